// Control-command probe: walk a hub through SUBSCRIBE/UNSUBSCRIBE/PUBLISH/LIST on one stream.
use bytes::Bytes;
use eventhub_transport::Connection;
use eventhub_wire::Command;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// The command sequence sent by the probe, in order.
pub fn script(topic: &str, message: &str) -> Vec<Command> {
    vec![
        Command::Subscribe(topic.to_string()),
        Command::Unsubscribe(topic.to_string()),
        Command::Publish(message.to_string()),
        Command::List,
    ]
}

/// Send each command, then collect replies for `pause` before the next one.
pub async fn run_script<C: Connection>(
    connection: &mut C,
    commands: &[Command],
    pause: Duration,
) -> eventhub_transport::Result<Vec<Bytes>> {
    let mut replies = Vec::new();
    for command in commands {
        info!(command = %command, "sending control command");
        connection.send(Bytes::from(command.encode())).await?;
        let deadline = Instant::now() + pause;
        loop {
            tokio::select! {
                reply = connection.receive() => {
                    let reply = reply?;
                    info!(
                        after = command.keyword(),
                        reply = %String::from_utf8_lossy(&reply),
                        "hub reply"
                    );
                    replies.push(reply);
                }
                () = tokio::time::sleep_until(deadline) => break,
            }
        }
    }
    Ok(replies)
}

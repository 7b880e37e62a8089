//! Minimal client: registers for `foo`, sends one `bar`, prints replies.
//!
//! Run against a peer speaking the event protocol:
//!
//! ```text
//! cargo run --example ping -- 127.0.0.1:47760
//! ```

use std::env;
use std::net::IpAddr;

use broccoli_client::value::{BroEnum, BroTime};
use broccoli_client::{BroPort, Connection, Event, Result};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "broccoli_client=debug".into()),
        )
        .init();

    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:47760".to_string());

    let conn = Connection::builder()
        .peer_class("ping-demo")
        .register("foo")
        .on_event("foo", |event| async move {
            println!("foo received:");
            for (i, arg) in event.args().iter().enumerate() {
                println!("  [{}] {}", i, arg);
            }
            Ok(())
        })
        .connect(addr.as_str())
        .await?;

    println!("connected, peer class {:?}", conn.peer_class());

    let event = Event::new("bar")
        .arg("Hello from Rust")
        .arg(true)
        .arg(IpAddr::from([192, 168, 1, 1]))
        .arg(BroPort::tcp(80))
        .arg(BroEnum::new(2, "transport_proto"))
        .arg(BroTime::now());

    if conn.send(&event).await? {
        println!("bar queued for delivery");
    } else {
        println!("bar rejected, transport is backlogged");
    }

    conn.wait_until_closed().await;
    println!("peer disconnected");
    Ok(())
}

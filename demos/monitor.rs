//! Watches attached controllers and prints engine events.
//!
//! Run with `RUST_LOG=xpclink=debug` for engine internals.

use xpclink::Engine;

#[tokio::main]
async fn main() -> Result<(), xpclink::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut engine = Engine::serial();
    let mut events = engine.subscribe();

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{event:?}");
        }
    });

    engine.run().await
}

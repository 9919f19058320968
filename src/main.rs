// reclaim_pool demo
//
// Shows a pool healing itself after a caller forgets to recycle.
// Run with: RUST_LOG=debug cargo run

use reclaim_pool::{ObjectPool, PoolConfiguration, PoolResult, Reclaimer, ReclaimerConfig};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> PoolResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let reclaimer = Reclaimer::new(ReclaimerConfig::new().with_interval(Duration::from_millis(200)));
    let pool = ObjectPool::builder(|| Vec::<u8>::with_capacity(1024))
        .with_configuration(PoolConfiguration::new().with_size(4).with_name("buffers"))
        .with_initializer(|buf: &mut Vec<u8>| buf.clear())
        .build()?;
    reclaimer.register(&pool);
    reclaimer.start()?;

    println!("Available at start: {}", pool.available_count());

    {
        let mut buf = pool.create()?;
        buf.extend_from_slice(b"recycled properly");
        pool.recycle(buf);
    }

    {
        let mut leaked = pool.create()?;
        leaked.extend_from_slice(b"never recycled");
    }

    println!("Available after leak: {}", pool.available_count());
    std::thread::sleep(Duration::from_millis(500));
    println!("Available after reclaim: {}", pool.available_count());

    for (key, value) in pool.get_metrics().export() {
        println!("  {}: {}", key, value);
    }

    reclaimer.shutdown();
    Ok(())
}

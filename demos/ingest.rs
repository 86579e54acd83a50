//! Simulated ingest run
//!
//! Pushes a burst of events (with a sprinkling of duplicates) from several
//! producer threads through the pipeline into a slow terminal consumer,
//! then prints the metrics snapshot.
//!
//! Usage: cargo run --example ingest --release

use event_pipeline::{Event, Pipeline};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

const PRODUCERS: u64 = 4;
const EVENTS_PER_PRODUCER: u64 = 500;
const CLIENTS: u64 = 40;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Event Dispatch Pipeline");
    println!("=======================");
    println!(
        "{} producers x {} events over {} clients, 20 workers",
        PRODUCERS, EVENTS_PER_PRODUCER, CLIENTS
    );
    println!();

    let start = Instant::now();

    let pipeline = Arc::new(
        Pipeline::builder()
            .workers(20)
            .dedup_window(Duration::from_secs(10))
            .build(|event: Event| {
                // Stand-in for real per-event work
                std::thread::sleep(Duration::from_millis(2));
                Ok(event)
            })?,
    );

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let pipeline = Arc::clone(&pipeline);
            std::thread::spawn(move || {
                for i in 0..EVENTS_PER_PRODUCER {
                    let n = producer * EVENTS_PER_PRODUCER + i;
                    // One in ten events is a duplicate of its predecessor
                    let uuid = if n % 10 == 9 {
                        Uuid::from_u128((n - 1) as u128)
                    } else {
                        Uuid::from_u128(n as u128)
                    };
                    if pipeline.accept(Event::new(n % CLIENTS, uuid)).is_err() {
                        break;
                    }
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().expect("Producer thread panicked");
    }

    pipeline.close()?;

    let elapsed = start.elapsed();
    println!("{}", pipeline.snapshot().format());
    println!("\nPipeline execution time: {:.3}s", elapsed.as_secs_f64());

    Ok(())
}

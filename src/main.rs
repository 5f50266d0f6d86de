use stress_test::{stress_test_flood, stress_test_scaling, FloodSettings};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            ASYNC FLOOD STRESS TESTS                        ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let runs = [
        // Small ring with a couple of chords
        FloodSettings::new(4, 200, 2),
        // Same scale with dedup compaction
        FloodSettings::new(4, 200, 2).compacting(),
        // Medium mesh, many redundant paths
        FloodSettings::new(10, 500, 15),
        // Medium mesh with compaction
        FloodSettings::new(10, 500, 15).compacting(),
    ];

    for settings in runs {
        match stress_test_flood(settings).await {
            Ok(stats) => stats.print(),
            Err(e) => {
                eprintln!("✗ stress test failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS (flooded ring + chords)          ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    if let Err(e) = stress_test_scaling(20, 4).await {
        eprintln!("✗ scaling analysis failed: {}", e);
        std::process::exit(1);
    }

    println!("\n✓ All stress tests completed successfully!");
}

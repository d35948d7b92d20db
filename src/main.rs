//! Strategy Evolve CLI - Inspect saved evolutionary databases.

use std::path::PathBuf;

use strategy_evolve::{evolution::EvolutionaryDatabase, schema::DatabaseConfig};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <checkpoint> [top]", args[0]);
        eprintln!();
        eprintln!("Print statistics for a saved evolutionary database.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  checkpoint  Checkpoint file, or directory written by save()");
        eprintln!("  top         Number of best elites to list (default: 5)");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let path = PathBuf::from(&args[1]);
    let top: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(5);

    let loaded = if path.is_dir() {
        EvolutionaryDatabase::load(&path)
    } else {
        EvolutionaryDatabase::load_file(&path)
    };
    let db = loaded.unwrap_or_else(|e| {
        eprintln!("Error loading checkpoint: {}", e);
        std::process::exit(1);
    });

    println!("Strategy Evolve Database");
    println!("========================");
    println!("Source: {}", path.display());
    println!(
        "Islands: {}, dimensions: {}",
        db.islands().len(),
        db.config().dimensions.len()
    );
    println!();
    print!("{}", db.statistics());

    let mut elites = db.feature_map().all();
    elites.sort_by(|a, b| b.score.total_cmp(&a.score));
    if !elites.is_empty() {
        println!();
        println!("Top elites:");
        for elite in elites.iter().take(top) {
            let cell = elite
                .cell()
                .map(ToString::to_string)
                .unwrap_or_default();
            println!(
                "  {} score={:.3} island={} cell={} {}",
                elite.id,
                elite.score,
                elite.island,
                cell,
                summarize(&elite.hypothesis, 60)
            );
        }
    }

    let insights = db.recent_insights(top);
    if !insights.is_empty() {
        println!();
        println!("Recent insights:");
        for insight in insights {
            println!("  [gen {}] {}", insight.generation, summarize(&insight.text, 80));
        }
    }
}

fn summarize(text: &str, width: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= width {
        line.to_string()
    } else {
        let cut: String = line.chars().take(width).collect();
        format!("{cut}...")
    }
}

fn print_example_config() {
    let config = DatabaseConfig::default();

    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing config: {}", e);
            std::process::exit(1);
        }
    }
}

//! Storage statistics command.

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use serde_json::json;

use lattice_config::LatticeConfig;
use lattice_postgres::Storage;

use crate::cli::StatsArgs;
use crate::exit::ExitCode;

pub async fn execute(config: LatticeConfig, args: StatsArgs) -> Result<ExitCode> {
    let storage = Storage::connect(&config.storage).await?;
    storage.ensure_schema().await?;
    let counts = storage.table_counts().await?;

    match args.format.as_str() {
        "json" => {
            let map: serde_json::Map<String, serde_json::Value> = counts
                .into_iter()
                .map(|(table, count)| (table, json!(count)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        _ => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Table", "Rows"]);
            for (name, count) in counts {
                table.add_row(vec![name, count.to_string()]);
            }
            println!("{table}");
        }
    }

    Ok(ExitCode::Success)
}

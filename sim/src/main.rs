//! Sprechfunk Simulator – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging, fuehrt die
//! Simulation aus und gibt den Bericht als JSON auf stdout aus.

use anyhow::Result;
use sprechfunk_observability::logging_initialisieren;
use sprechfunk_sim::{config::SimConfig, simulation_ausfuehren};

fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("SF_CONFIG").unwrap_or_else(|_| "sprechfunk.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = SimConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Sprechfunk Simulator wird initialisiert"
    );

    let bericht = simulation_ausfuehren(&config)?;
    println!("{}", serde_json::to_string_pretty(&bericht)?);

    Ok(())
}

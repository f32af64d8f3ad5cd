//! saumon-cli/src/main.rs
//!
//! Point d’entrée du binaire `saumon`.
//! Ici, on se contente de préparer l’environnement (logs, rapports
//! d’erreurs) puis on délègue toute la logique à `saumon_cli::run()`.
//!
//! Avantages :
//! - `lib.rs` peut être testé en unité (cargo test -p saumon-cli)
//! - main.rs reste minimal, juste pour le setup global

use std::process::ExitCode;

fn main() -> ExitCode {
    // Rapports d’erreurs stylés pour les paniques internes
    if let Err(e) = color_eyre::install() {
        eprintln!("⚠️ Impossible d'initialiser color-eyre: {e}");
    }

    // Logs opt-in via RUST_LOG (gc, trace d’exécution…)
    env_logger::init();

    saumon_cli::run()
}

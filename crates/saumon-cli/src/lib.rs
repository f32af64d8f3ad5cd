//! saumon-cli — REPL et lanceur de fichiers pour le langage Saumon.
//!
//! Sémantique des arguments :
//!   - zéro argument  → REPL interactif, une VM persistante par session ;
//!   - un argument    → lit le fichier entier et l’interprète une fois ;
//!   - deux ou plus   → usage sur stderr, code 64.
//!
//! Codes de sortie : 64 usage, 65 erreur de compilation, 70 erreur
//! runtime, 74 erreur d’E/S.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

use std::fs;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;

use saumon_core::{InterpretError, Vm};

const EX_OK: u8 = 0;
const EX_USAGE: u8 = 64;
const EX_DATAERR: u8 = 65;
const EX_SOFTWARE: u8 = 70;
const EX_IOERR: u8 = 74;

#[derive(Debug, Parser)]
#[command(name = "saumon", version, about = "Interpréteur du langage Saumon")]
struct Cli {
    /// Script à exécuter ; sans argument, ouvre le REPL.
    #[arg(value_name = "path")]
    scripts: Vec<Utf8PathBuf>,
}

/// Ce que la ligne de commande demande.
#[derive(Debug, PartialEq, Eq)]
enum Mode<'a> {
    Repl,
    File(&'a Utf8Path),
    Usage,
}

fn mode(scripts: &[Utf8PathBuf]) -> Mode<'_> {
    match scripts {
        [] => Mode::Repl,
        [path] => Mode::File(path),
        _ => Mode::Usage,
    }
}

/// Le cœur du CLI — renvoie le code de sortie du process.
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let code = match mode(&cli.scripts) {
        Mode::Repl => repl(),
        Mode::File(path) => run_file(path),
        Mode::Usage => {
            eprintln!("Usage: saumon [path]");
            EX_USAGE
        }
    };
    ExitCode::from(code)
}

/// Boucle interactive : une ligne, une interprétation. La VM persiste, les
/// globales (et les chaînes internées) survivent d’une ligne à l’autre.
fn repl() -> u8 {
    let mut vm = Vm::new();
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        let _ = io::stdout().flush();
        match lines.next() {
            Some(Ok(line)) => {
                // les erreurs sont déjà sur stderr ; le REPL continue
                let _ = vm.interpret(&line);
            }
            Some(Err(_)) | None => {
                println!();
                return EX_OK;
            }
        }
    }
}

fn run_file(path: &Utf8Path) -> u8 {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(_) => {
            eprintln!("Could not open file \"{path}\".");
            return EX_IOERR;
        }
    };

    let mut vm = Vm::new();
    match vm.interpret(&source) {
        Ok(()) => EX_OK,
        Err(InterpretError::Compile) => EX_DATAERR,
        Err(InterpretError::Runtime) => EX_SOFTWARE,
    }
}

/* ------------------------------- Tests ------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_counts_pick_the_mode() {
        assert_eq!(mode(&[]), Mode::Repl);
        let one = vec![Utf8PathBuf::from("script.smn")];
        assert_eq!(mode(&one), Mode::File(Utf8Path::new("script.smn")));
        let two = vec![Utf8PathBuf::from("a"), Utf8PathBuf::from("b")];
        assert_eq!(mode(&two), Mode::Usage);
    }

    #[test]
    fn clap_accepts_any_positional_count() {
        // le comptage (et le code 64) reste notre affaire, pas celle de clap
        let cli = Cli::try_parse_from(["saumon", "a.smn", "b.smn", "c.smn"]).expect("parse ok");
        assert_eq!(cli.scripts.len(), 3);
        let cli = Cli::try_parse_from(["saumon"]).expect("parse ok");
        assert!(cli.scripts.is_empty());
    }

    #[test]
    fn missing_file_exits_74() {
        assert_eq!(run_file(Utf8Path::new("/inexistant/certainement/pas.smn")), EX_IOERR);
    }

    #[test]
    fn file_runs_map_to_exit_codes() {
        let dir = std::env::temp_dir();
        let stamp = std::process::id();

        let ok = dir.join(format!("saumon_ok_{stamp}.smn"));
        fs::File::create(&ok).and_then(|mut f| f.write_all(b"print 1 + 2;")).expect("write ok");
        let ok_path = Utf8PathBuf::from_path_buf(ok.clone()).expect("chemin utf-8");
        assert_eq!(run_file(&ok_path), EX_OK);

        let bad = dir.join(format!("saumon_bad_{stamp}.smn"));
        fs::File::create(&bad).and_then(|mut f| f.write_all(b"print ;")).expect("write ok");
        let bad_path = Utf8PathBuf::from_path_buf(bad.clone()).expect("chemin utf-8");
        assert_eq!(run_file(&bad_path), EX_DATAERR);

        let boom = dir.join(format!("saumon_boom_{stamp}.smn"));
        fs::File::create(&boom).and_then(|mut f| f.write_all(b"print x;")).expect("write ok");
        let boom_path = Utf8PathBuf::from_path_buf(boom.clone()).expect("chemin utf-8");
        assert_eq!(run_file(&boom_path), EX_SOFTWARE);

        let _ = fs::remove_file(ok);
        let _ = fs::remove_file(bad);
        let _ = fs::remove_file(boom);
    }
}

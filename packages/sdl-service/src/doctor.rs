//! Environment doctor
//!
//! Pre-flight checks for the CLI: configuration validity, database
//! writability, grammar availability, worker settings. Any failed check
//! maps to exit code 2.

use serde::Serialize;

use sdl_core::features::parsing::LanguageId;
use sdl_core::SdlConfig;

#[derive(Debug, Clone, Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub checks: Vec<DoctorCheck>,
    pub ok: bool,
}

pub fn run(config: &SdlConfig) -> DoctorReport {
    let mut checks = Vec::new();

    checks.push(match config.validate() {
        Ok(()) => DoctorCheck {
            name: "config".into(),
            ok: true,
            detail: format!("{} repo(s) configured", config.repos.len()),
        },
        Err(err) => DoctorCheck {
            name: "config".into(),
            ok: false,
            detail: err.to_string(),
        },
    });

    let db_path = config.db_path();
    let db_parent = db_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(std::path::Path::to_path_buf)
        .unwrap_or_else(|| std::path::PathBuf::from("."));
    let writable = db_path.exists() || db_parent.is_dir();
    checks.push(DoctorCheck {
        name: "database".into(),
        ok: writable,
        detail: if writable {
            format!("{} reachable", db_path.display())
        } else {
            format!("{} has no parent directory", db_path.display())
        },
    });

    // every grammar must load into a fresh parser
    let mut grammar_failures = Vec::new();
    for id in LanguageId::all() {
        if !id.grammar_loads() {
            grammar_failures.push(id.as_str());
        }
    }
    checks.push(DoctorCheck {
        name: "grammars".into(),
        ok: grammar_failures.is_empty(),
        detail: if grammar_failures.is_empty() {
            format!("{} grammars load", LanguageId::all().len())
        } else {
            format!("failing grammars: {}", grammar_failures.join(", "))
        },
    });

    let workers = config.indexing.effective_workers();
    checks.push(DoctorCheck {
        name: "workers".into(),
        ok: workers >= 1,
        detail: format!("{workers} extraction workers"),
    });

    for repo in &config.repos {
        let exists = repo.root_path.is_dir();
        checks.push(DoctorCheck {
            name: format!("repo:{}", repo.repo_id),
            ok: exists,
            detail: if exists {
                format!("{} present", repo.root_path.display())
            } else {
                format!("{} missing", repo.root_path.display())
            },
        });
    }

    let ok = checks.iter().all(|c| c.ok);
    DoctorReport { checks, ok }
}

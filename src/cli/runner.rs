//! Dispatches a parsed [`Command`] onto a [`Repository`], with a plain-text vs.
//! machine-readable output split (`run`/`run_with_format`).

use crate::config::ClientConfig;
use crate::repo::{OpenMode, Repository};

use super::command::Command;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputMode {
    Human,
    Plain,
    Json,
}

/// Dispatch `cmd` against the repository at `repo_root`, printing in [`OutputMode::Human`].
///
/// # Errors
/// Propagates any [`crate::errors::RepoError`] raised opening the repository or running the
/// requested operation.
pub fn run(repo_root: &std::path::Path, cmd: Command) -> Result<(), Box<dyn std::error::Error>> {
    run_with_format(repo_root, cmd, OutputMode::Human)
}

/// Dispatch `cmd` against the repository at `repo_root`, printing in the given `mode`.
///
/// # Errors
/// Propagates any [`crate::errors::RepoError`] raised opening the repository or running the
/// requested operation.
pub fn run_with_format(
    repo_root: &std::path::Path,
    cmd: Command,
    mode: OutputMode,
) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        Command::Init => {
            Repository::init(repo_root)?;
            print_kv(mode, "created", &[("root", &repo_root.display().to_string())]);
            Ok(())
        }
        Command::ClientAdd { name, paths } => {
            let repo = Repository::open(repo_root, OpenMode::ReadWrite)?;
            repo.create_client(ClientConfig::new(name.clone(), paths))?;
            print_kv(mode, "client-added", &[("name", &name)]);
            Ok(())
        }
        Command::Clients => {
            let repo = Repository::open(repo_root, OpenMode::ReadOnly)?;
            let clients = repo.clients()?;
            match mode {
                OutputMode::Json => println!("{}", serde_json::json!({ "clients": clients })),
                _ => {
                    for name in &clients {
                        println!("{name}");
                    }
                }
            }
            Ok(())
        }
        Command::Backup { client } => {
            let mut repo = Repository::open(repo_root, OpenMode::ReadWrite)?;
            let now = current_time_secs();
            let report = repo.backup_client(&client, now)?;
            match mode {
                OutputMode::Json => println!(
                    "{}",
                    serde_json::json!({
                        "client": client,
                        "added": report.added,
                        "meta_only": report.meta_only,
                        "modified": report.modified,
                        "incomplete": report.incomplete,
                        "conflict": report.conflict,
                        "recovered": report.recovered,
                        "link_changed": report.link_changed,
                        "ignored": report.ignored,
                    })
                ),
                OutputMode::Plain => println!(
                    "{client} A={} ~={} M={} !={} C={} R={} L={} ignored={}",
                    report.added,
                    report.meta_only,
                    report.modified,
                    report.incomplete,
                    report.conflict,
                    report.recovered,
                    report.link_changed,
                    report.ignored
                ),
                OutputMode::Human => println!(
                    "backup {client}: added={} meta_only={} modified={} incomplete={} conflict={} \
                     recovered={} link_changed={} ignored={}",
                    report.added,
                    report.meta_only,
                    report.modified,
                    report.incomplete,
                    report.conflict,
                    report.recovered,
                    report.link_changed,
                    report.ignored
                ),
            }
            Ok(())
        }
        Command::Scan => {
            let mut repo = Repository::open(repo_root, OpenMode::ReadWrite)?;
            let report = repo.scan()?;
            match mode {
                OutputMode::Json => println!(
                    "{}",
                    serde_json::json!({
                        "referenced": report.referenced,
                        "newly_missing": report.newly_missing,
                        "newly_inconsistent": report.newly_inconsistent,
                        "removed_unreferenced": report.removed_unreferenced,
                    })
                ),
                _ => println!(
                    "scan: referenced={} newly_missing={} newly_inconsistent={} removed={}",
                    report.referenced,
                    report.newly_missing,
                    report.newly_inconsistent,
                    report.removed_unreferenced
                ),
            }
            Ok(())
        }
        Command::Check { repair } => {
            let mut repo = Repository::open(repo_root, OpenMode::ReadWrite)?;
            let report = repo.check(repair)?;
            match mode {
                OutputMode::Json => println!(
                    "{}",
                    serde_json::json!({ "checked": report.checked, "corrupt": report.corrupt })
                ),
                _ => println!("check: checked={} corrupt={}", report.checked, report.corrupt),
            }
            Ok(())
        }
        Command::Restore { client, dest, prefix, date } => {
            let repo = Repository::open(repo_root, OpenMode::ReadOnly)?;
            let now = current_time_secs();
            let report = repo.restore(&client, date, now, &prefix, &dest)?;
            match mode {
                OutputMode::Json => println!(
                    "{}",
                    serde_json::json!({ "restored": report.restored, "failed": report.failed })
                ),
                _ => println!("restore: restored={} failed={}", report.restored, report.failed),
            }
            Ok(())
        }
    }
}

fn print_kv(mode: OutputMode, action: &str, fields: &[(&str, &str)]) {
    match mode {
        OutputMode::Json => {
            let mut obj = serde_json::Map::new();
            obj.insert("action".into(), serde_json::Value::String(action.into()));
            for (k, v) in fields {
                obj.insert((*k).to_string(), serde_json::Value::String((*v).to_string()));
            }
            println!("{}", serde_json::Value::Object(obj));
        }
        OutputMode::Plain => {
            let joined = fields.iter().map(|(_, v)| (*v).to_string()).collect::<Vec<_>>().join(" ");
            println!("{action} {joined}");
        }
        OutputMode::Human => {
            let joined =
                fields.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(" ");
            println!("{action}: {joined}");
        }
    }
}

fn current_time_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

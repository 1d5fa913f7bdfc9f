use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use vtop::aggregate::KindReport;
use vtop::app::{App, Freshness};
use vtop::cli::{Args, Command, term_request};
use vtop::config::Config;
use vtop::logging::setup_logging;
use vtop::portal::models::{Diagnostic, ExportDocument, Severity};
use vtop::portal::{AuthError, Challenge, ChallengeSolver};
use yansi::Paint;

/// Writes the challenge image next to the session file and reads the answer
/// from stdin.
struct PromptSolver {
    image_dir: PathBuf,
}

#[async_trait]
impl ChallengeSolver for PromptSolver {
    async fn solve(&self, challenge: &Challenge) -> Result<String, AuthError> {
        let extension = challenge.mime.rsplit('/').next().unwrap_or("png");
        let path = self.image_dir.join(format!("vtop-captcha.{extension}"));
        tokio::fs::write(&path, &challenge.image)
            .await
            .map_err(|e| AuthError::ChallengeFailed(format!("writing {}: {e}", path.display())))?;

        let prompt = format!("Captcha saved to {}. Enter the text: ", path.display());
        let answer = read_line(prompt).await?;
        let _ = tokio::fs::remove_file(&path).await;
        if answer.is_empty() {
            return Err(AuthError::ChallengeFailed("no answer given".to_owned()));
        }
        Ok(answer)
    }
}

async fn read_line(prompt: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || {
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{prompt}");
        let _ = stderr.flush();
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).map(|_| line.trim().to_owned())
    })
    .await
    .map_err(|e| AuthError::ChallengeFailed(e.to_string()))?
    .map_err(|e| AuthError::ChallengeFailed(e.to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config and setup logging before anything else so startup logs are never dropped
    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        "starting vtop"
    );

    match run(args.command, &mut config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "Command failed");
            eprintln!("{} {e:#}", "error:".red().bold());
            if let Some(auth) = e.downcast_ref::<AuthError>()
                && auth.is_permanent()
            {
                eprintln!(
                    "{} check VTOP_PASSWORD or run `vtop login` again",
                    "hint:".yellow().bold()
                );
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &mut Config) -> anyhow::Result<ExitCode> {
    if config.vtop_username.is_none() {
        config.vtop_username = Some(read_line("VTOP username: ".to_owned()).await?);
    }
    // Only an interactive login needs the password; resumed sessions do not.
    if config.vtop_password.is_none() && matches!(command, Command::Login) {
        config.vtop_password = Some(read_line("VTOP password: ".to_owned()).await?);
    }

    let image_dir = config
        .vtop_session_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let app = App::new(config.clone(), Arc::new(PromptSolver { image_dir }))?;

    match command {
        Command::Login => {
            let handle = app.login().await?;
            eprintln!(
                "{} logged in as {}",
                "ok:".green().bold(),
                handle.registration.bold()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Export {
            force,
            max_age,
            output,
        } => {
            let freshness = match (force, max_age) {
                (true, _) => Freshness::Force,
                (false, Some(max_age)) => Freshness::MaxAge(max_age),
                (false, None) => Freshness::Cached,
            };
            let document = app.get_export_document(freshness).await?;
            write_json(&*document, output.as_deref())?;
            print_document_summary(&document);
            Ok(exit_for(document.is_empty()))
        }
        Command::Get {
            kind,
            term,
            back,
            output,
        } => {
            let report = app
                .get_single_record_kind(kind.into(), &term_request(term, back))
                .await?;
            write_json(&report, output.as_deref())?;
            print_report_summary(&report);
            Ok(exit_for(report.records.is_empty()))
        }
        Command::Status => {
            let status = app.status().await?;
            write_json(&status, None)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Clear => {
            let message = if app.clear_cache().await? {
                "cached document removed"
            } else {
                "nothing cached"
            };
            eprintln!("{} {message}", "ok:".green().bold());
            Ok(ExitCode::SUCCESS)
        }
        Command::Logout => {
            app.logout().await?;
            eprintln!("{} session removed", "ok:".green().bold());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_for(empty: bool) -> ExitCode {
    if empty { ExitCode::from(2) } else { ExitCode::SUCCESS }
}

fn write_json<T: Serialize + ?Sized>(value: &T, output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    match output {
        Some(path) => std::fs::write(path, json + "\n")
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn print_document_summary(document: &ExportDocument) {
    let term = document
        .current_term
        .as_deref()
        .unwrap_or("unknown term");
    eprintln!(
        "{} {} ({}): {} marks, {} attendance, {} exams, {} timetable slots",
        "export".bold(),
        document.identity,
        term,
        document.marks.records.len(),
        document.attendance.records.len(),
        document.exams.records.len(),
        document.timetable.records.len(),
    );
    print_diagnostics(&document.diagnostics);
}

fn print_report_summary(report: &KindReport) {
    let term = report
        .source_term
        .as_ref()
        .map(|t| t.label.as_str())
        .unwrap_or("-");
    eprintln!(
        "{} {} [{}]: {} records",
        "get".bold(),
        report.kind.as_str(),
        term,
        report.records.len()
    );
    print_diagnostics(&report.diagnostics);
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        let tag = match diagnostic.severity {
            Severity::Info => "info".dim(),
            Severity::Warning => "warn".yellow(),
            Severity::Error => "fail".red().bold(),
        };
        eprintln!("  {tag} {diagnostic}");
    }
}

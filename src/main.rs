use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use usercode::config::{CliArgs, Config};
use usercode::script::CommandEvaluator;
use usercode::session::ProcessLauncher;
use usercode::worker::{GradeJob, grade_all};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    if cli.threads == 0 {
        bail!("The number of concurrent sessions must not be 0");
    }

    let Config {
        simulator: simulator_config,
        question: question_config,
        evaluator: evaluator_config,
    } = cli.to_config().context("Failed to load configuration")?;

    let jobs = read_submissions(&cli.submissions)?;

    let launcher = Arc::new(ProcessLauncher::new(simulator_config));
    let evaluator = Arc::new(
        CommandEvaluator::build(&evaluator_config).context("Failed to set up script evaluator")?,
    );
    let question_config = Arc::new(question_config);
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let grading = grade_all(
        jobs,
        launcher,
        evaluator,
        question_config,
        cli.threads,
        shutdown_token.clone(),
    );
    tokio::pin!(grading);

    let reports = tokio::select! {
        reports = &mut grading => reports,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, finishing running sessions...");
            shutdown_token.cancel();
            grading.await
        }
    };

    for report in &reports {
        println!("{}", serde_json::to_string(report)?);
    }

    log::info!("Graded {} submission(s)", reports.len());
    Ok(())
}

/// Reads each named submission file, or stdin for `-`
fn read_submissions(paths: &[String]) -> anyhow::Result<Vec<GradeJob>> {
    paths
        .iter()
        .map(|path| {
            let source = if path == "-" {
                let mut source = String::new();
                std::io::stdin().read_to_string(&mut source)?;
                source
            } else {
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read submission {path}"))?
            };
            Ok(GradeJob {
                name: path.clone(),
                source,
            })
        })
        .collect()
}

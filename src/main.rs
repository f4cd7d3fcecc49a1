use anyhow::Result;
use clap::Parser;

mod cache;
mod cli;
mod config;
mod i18n;
mod llm;
mod pipeline;
mod prompts;
mod storage;
mod utils;

use pipeline::context::PipelineContext;
use pipeline::workflow;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    let resume_session = args.resume.clone();
    let config = args.into_config();

    let ctx = PipelineContext::new(config)?;
    ctx.llm_client.check_connection().await?;

    let state = match resume_session {
        Some(session_id) => workflow::resume(&ctx, &session_id).await?,
        None => {
            let documents = cli::read_input_documents(&ctx.config.input_path)?;
            workflow::launch(&ctx, documents).await?
        }
    };

    if let Some(report) = &state.final_report {
        std::fs::create_dir_all(&ctx.config.output_path)?;
        let report_path = ctx.config.output_path.join("feasibility_report.md");
        std::fs::write(&report_path, report)?;
        println!("📄 报告已写入 {}", report_path.display());
    }

    println!("{}", state.run_summary());
    Ok(())
}

use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;

use jebao::{AppContext, Args, OutputFormat, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let log_level = args.log_level();
        let output_format = args.output_format().unwrap_or(if stdout.is_terminal() {
            OutputFormat::Pretty
        } else {
            OutputFormat::Json
        });
        let context = AppContext::load(args.config(), args.models())?;

        run(
            args.into_command(),
            context,
            &mut stdout,
            output_format,
            log_level,
        )
        .await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}

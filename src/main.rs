use std::process::ExitCode;

use clap::Parser;

use devinfo::{Args, fake_transport, real_transport, run_with_log_level};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let log_level = args.log_level();
        let settings = args.session_settings();
        let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
        let transport = match maybe_fake_args {
            Some(fake_args) => fake_transport(fake_args),
            None => real_transport(),
        };

        run_with_log_level(command, &mut stdout, transport, settings, log_level).await
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

//! `usermap`: builds the ntfs-3g user mapping file of Windows volumes.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use ntfs_usermap::{
    ConsolePrompter, Error, RunReport, SecurityApi, Usermap, UsermapConfig, render_minimal,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "usermap", version)]
#[command(about = "Build the ntfs-3g user mapping file of Windows volumes")]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, env = "USERMAP_CONFIG")]
    config: Option<PathBuf>,

    /// Directory receiving the mapping, instead of the last volume
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// More logging, repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Never ask questions, even on a terminal
    #[arg(long)]
    unattended: bool,

    /// Drive roots or ntfs-3g mount points, system volume first
    #[arg(required = true)]
    volumes: Vec<PathBuf>,
}

impl Cli {
    fn output_root(&self) -> &Path {
        if let Some(output) = &self.output {
            return output;
        }
        match self.volumes.as_slice() {
            [_, second, ..] => second,
            [first] => first,
            [] => Path::new("."),
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn report(out: &mut impl Write, report: &RunReport) -> io::Result<()> {
    let outcome = &report.outcome;
    writeln!(out)?;
    if outcome.relocate {
        writeln!(out, "The mapping file was written to \"{}\"", outcome.path.display())?;
        writeln!(out, "Please move it into the mapping directory of the volume")?;
    } else {
        writeln!(out, "Mapping file \"{}\" written", outcome.path.display())?;
    }
    if !outcome.undecided.is_empty() {
        writeln!(out, "No mapping was defined for:")?;
        for sid in &outcome.undecided {
            writeln!(out, "   {sid}")?;
        }
    }
    out.flush()
}

fn execute<A: SecurityApi>(cli: &Cli, api: A) -> Result<(), Error> {
    let config = UsermapConfig::load_or_default(cli.config.as_deref())?;
    let attended = !cli.unattended && io::stdin().is_terminal() && io::stdout().is_terminal();
    let usermap = Usermap::new(api, config);

    if !attended {
        if let Some(identity) = usermap.api().default_identity() {
            let text = render_minimal(&identity, &usermap.config().banner)?;
            let mut stdout = io::stdout().lock();
            return stdout
                .write_all(text.as_bytes())
                .and_then(|()| stdout.flush())
                .map_err(Error::Prompt);
        }
        let run = usermap.run(
            &cli.volumes,
            cli.output_root(),
            None::<&mut ConsolePrompter<io::Sink>>,
        )?;
        return report(&mut io::stdout().lock(), &run).map_err(Error::Prompt);
    }

    let mut prompter = ConsolePrompter::stdio();
    prompter.greet().map_err(Error::Prompt)?;
    let run = usermap.run(&cli.volumes, cli.output_root(), Some(&mut prompter))?;
    report(&mut io::stdout().lock(), &run).map_err(Error::Prompt)
}

cfg_if::cfg_if! {
    if #[cfg(any(windows, target_os = "linux"))] {
        fn dispatch(cli: &Cli) -> Result<(), Error> {
            execute(cli, ntfs_usermap::volume::HostApi::default())
        }
    } else {
        // No backend here: every volume is reported unavailable.
        fn dispatch(cli: &Cli) -> Result<(), Error> {
            execute(cli, ntfs_usermap::volume::memory::MemoryApi::new())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match dispatch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "usermap failed");
            ExitCode::FAILURE
        }
    }
}

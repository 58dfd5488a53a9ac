mod application;
mod apply;
mod desired;
mod interrupt;
mod logging;
mod options;
mod refresh;
mod remote;
mod state;

use anyhow::Result;
use application::{handle_result, runtime};
use clap::{CommandFactory as _, Parser, Subcommand};
use options::Options;

fn main() {
    let args = Args::parse();
    handle_result(run_args(args));
}

fn run_args(args: Args) -> Result<()> {
    match &args.command {
        Commands::GenerateMan => {
            let cmd = Args::command();
            let man = clap_mangen::Man::new(cmd);
            let mut buffer: Vec<u8> = Default::default();
            man.render(&mut buffer)?;
            println!("{}", String::from_utf8(buffer)?);
            return Ok(());
        }
        Commands::GenerateMarkdown => {
            let opts = clap_markdown::MarkdownOptions::new().show_footer(false);
            let markdown: String = clap_markdown::help_markdown_custom::<Args>(&opts);
            println!("{}", markdown);
            return Ok(());
        }
        Commands::GenerateCompletion { shell } => {
            let mut cmd = Args::command();
            clap_complete::generate(*shell, &mut cmd, "versync", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let mut logging = logging::set_up(logging::Options {
        verbose: args.options.verbose,
        color: args.options.use_color(),
    })?;
    let interrupt_state = interrupt::set_up_process_interrupt_handler()?;

    let result = runtime()?.block_on(async {
        match &args.command {
            Commands::Init(subargs) => refresh::init(subargs),
            Commands::Plan(subargs) => apply::plan(subargs).await,
            Commands::Apply(subargs) => apply::apply(&interrupt_state, subargs).await,
            Commands::Refresh(subargs) => refresh::refresh(subargs).await,
            Commands::Show(subargs) => refresh::show(subargs),
            Commands::GenerateMan
            | Commands::GenerateMarkdown
            | Commands::GenerateCompletion { .. } => Ok(()),
        }
    });
    logging.tear_down()?;
    result
}

/// versync: keep the configuration of a versioned service in its desired state
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    options: Options,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a service in the emulated remote
    #[command()]
    Init(refresh::InitArgs),

    /// Show what apply would change, without changing anything
    #[command()]
    Plan(apply::PlanArgs),

    /// Clone the active version, apply the changes, then validate and activate it
    #[command()]
    Apply(apply::Args),

    /// Read the service and record its observed state
    #[command()]
    Refresh(refresh::Args),

    /// Print the recorded observed state
    #[command()]
    Show(refresh::ShowArgs),

    /// Generate markdown documentation for versync
    #[command(hide = true)]
    GenerateMarkdown,

    /// Generate a manpage for versync
    #[command(hide = true)]
    GenerateMan,

    /// Generate shell completion for versync
    #[command(hide = true)]
    GenerateCompletion {
        /// The shell to generate completion for
        #[arg(long)]
        shell: clap_complete::Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_apply() {
        let args = Args::try_parse_from([
            "versync",
            "apply",
            "--desired",
            "d.json",
            "--service",
            "svc",
            "--no-activate",
            "--parallel",
            "1",
        ])
        .unwrap();
        assert!(matches!(args.command, Commands::Apply(_)));
        assert!(!args.options.verbose);
    }
}

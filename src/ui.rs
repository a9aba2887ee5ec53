use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

/// How stage progress is drawn on stderr.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum UiMode {
    /// Spinners when stderr is a terminal and the report is not piped.
    #[default]
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    stderr_is_tty: bool,
    stdout_is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, stderr_is_tty: bool, stdout_is_tty: bool) -> Self {
        Self {
            mode,
            stderr_is_tty,
            stdout_is_tty,
        }
    }

    pub fn detect(mode: UiMode) -> Self {
        Self::new(
            mode,
            std::io::stderr().is_terminal(),
            std::io::stdout().is_terminal(),
        )
    }

    fn use_pretty(&self) -> bool {
        self.stderr_is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => self.stdout_is_tty,
                UiMode::Plain => false,
            }
    }

    /// Run `f` as a named stage, reporting its outcome and duration.
    pub fn run_stage<T, E>(&self, name: &str, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let spinner = if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            Some(spinner)
        } else {
            eprintln!("==> {}", name);
            None
        };

        let start = Instant::now();
        let result = f();
        let mark = if result.is_ok() { "✔" } else { "✘" };
        let message = format!("{} {} ({})", mark, name, format_duration(start.elapsed()));
        match spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
        result
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::detect::PlateCandidate;
use crate::pipeline::PipelineState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    /// Status line for one capture session.
    pub fn session(&self, label: &str) -> SessionStatus {
        let spinner = self.use_pretty().then(|| {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{label}…"));
            spinner
        });
        if spinner.is_none() {
            eprintln!("==> {}", label);
        }
        SessionStatus {
            label: label.to_string(),
            start: Instant::now(),
            spinner,
            state: PipelineState::Idle,
            frames: 0,
            candidates: 0,
        }
    }
}

/// Mirrors pipeline events on stderr: a spinner on a terminal, plain lines otherwise.
pub struct SessionStatus {
    label: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    state: PipelineState,
    frames: u64,
    candidates: u64,
}

impl SessionStatus {
    pub fn set_state(&mut self, state: &PipelineState) {
        self.state = state.clone();
        match &self.spinner {
            Some(_) => self.refresh(),
            None => eprintln!("==> {}: {}", self.label, state),
        }
    }

    pub fn record_frame(&mut self) {
        self.frames += 1;
        self.refresh();
    }

    pub fn record_candidate(&mut self, candidate: &PlateCandidate) {
        self.candidates += 1;
        let line = format!(
            "plate {} ({:.2}) at {},{} {}x{}",
            candidate.text,
            candidate.confidence,
            candidate.bbox.x,
            candidate.bbox.y,
            candidate.bbox.width,
            candidate.bbox.height
        );
        match &self.spinner {
            Some(spinner) => spinner.println(line),
            None => eprintln!("{line}"),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn candidates(&self) -> u64 {
        self.candidates
    }

    fn refresh(&self) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!(
                "{} [{}] {} frames, {} candidates",
                self.label, self.state, self.frames, self.candidates
            ));
        }
    }
}

impl Drop for SessionStatus {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!(
            "✔ {}: {} frames, {} candidates ({})",
            self.label,
            self.frames,
            self.candidates,
            format_duration(elapsed)
        );
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_needs_a_terminal() {
        assert!(!Ui::from_args(Some("pretty"), false).use_pretty());
        assert!(!Ui::from_args(Some("plain"), true).use_pretty());
        assert!(Ui::from_args(None, true).use_pretty());
        assert!(Ui::from_args(Some("bogus"), true).use_pretty());
    }

    #[test]
    fn plain_session_counts() {
        let ui = Ui::new(UiMode::Plain, false);
        let mut status = ui.session("stub://cam");
        status.set_state(&PipelineState::Running);
        status.record_frame();
        status.record_frame();
        assert_eq!(status.frames(), 2);
        assert_eq!(status.candidates(), 0);
    }

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}

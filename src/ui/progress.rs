use crate::ingest::ProgressMessage;
use crate::ui::output::{is_quiet, theme, Icons};
use indicatif::{HumanDuration, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

/// One bar per layer, driven by the ingestor's progress channel
pub struct IngestProgress {
    mp: MultiProgress,
    handle: thread::JoinHandle<()>,
}

impl IngestProgress {
    pub fn new() -> (Self, crossbeam::channel::Sender<ProgressMessage>) {
        let (tx, rx) = crossbeam::channel::unbounded::<ProgressMessage>();

        let mp = if console::Term::stdout().is_term() && !is_quiet() {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let style = ProgressStyle::with_template("{prefix:>24} [{bar:30}] {pos}/{len} {msg}")
            .map(|s| s.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar());

        let mp_clone = mp.clone();
        let handle = thread::spawn(move || {
            let mut bars: HashMap<String, ProgressBar> = HashMap::new();

            for msg in rx {
                match msg {
                    ProgressMessage::LayerStarted { layer, total } => {
                        let bar = mp_clone.add(ProgressBar::new(total as u64));
                        bar.set_style(style.clone());
                        bar.set_prefix(layer.clone());
                        bars.insert(layer, bar);
                    }
                    ProgressMessage::Inserted { layer, inserted, .. } => {
                        if let Some(bar) = bars.get(&layer) {
                            bar.set_position(inserted as u64);
                        }
                    }
                    ProgressMessage::LayerFinished { layer, .. } => {
                        if let Some(bar) = bars.get(&layer) {
                            bar.finish_with_message("done");
                        }
                    }
                    ProgressMessage::LayerFailed { layer, error } => {
                        let bar = bars
                            .remove(&layer)
                            .unwrap_or_else(|| mp_clone.add(ProgressBar::new(0)));
                        bar.set_style(style.clone());
                        bar.set_prefix(layer);
                        bar.abandon_with_message(format!("failed: {}", error));
                    }
                }
            }
        });

        (Self { mp, handle }, tx)
    }

    /// Wait for the channel to close (every sender dropped) and clear the bars
    pub fn finish(self) {
        let _ = self.handle.join();
        self.mp.clear().ok();
    }

    pub fn finish_with_summary(self, duration: Duration, layers: usize, rows: usize, failed: usize) {
        self.finish();
        if is_quiet() {
            return;
        }
        println!();
        println!(
            "{} {}",
            Icons::CHECK.style(theme().success.clone()),
            format!("Seeded in {}", HumanDuration(duration)).style(theme().success.clone())
        );
        println!(
            "  {} {} layers  {} {} rows  {} {} failed",
            Icons::LAYER.style(theme().info.clone()),
            layers,
            Icons::DATABASE.style(theme().info.clone()),
            rows,
            Icons::CROSS.style(theme().error.clone()),
            failed
        );
    }
}

/// Spinner for the single long await (query generation)
pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_message(message.to_string());
        if console::Term::stdout().is_term() && !is_quiet() {
            pb.enable_steady_tick(Duration::from_millis(100));
        } else {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self { pb }
    }

    pub fn finish_and_clear(&self) {
        self.pb.finish_and_clear();
    }
}

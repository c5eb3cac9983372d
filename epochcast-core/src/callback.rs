//! Training lifecycle hooks that report progress to Telegram.

use crate::chart::{ChartRenderer, render_metrics};
use crate::config::{NotifierConfig, RenderConfig};
use crate::error::{EpochcastError, RenderError};
use crate::metrics::{EpochLogs, TrackedMetrics};
use crate::telegram::{TelegramNotifier, create_telegram_notifier};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// What the training loop knows about the model being trained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    /// Metrics to chart, in panel order. Empty means every tracked base metric.
    #[serde(default)]
    pub metric_names: Vec<String>,
}

impl ModelInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric_names: Vec::new(),
        }
    }

    pub fn with_metrics<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metric_names = names.into_iter().map(Into::into).collect();
        self
    }
}

/// Hooks a training loop calls at the start, after every epoch, and at the end.
pub trait TrainingCallback {
    fn on_train_begin(&mut self, _model: &ModelInfo, _logs: &EpochLogs) {}

    fn on_epoch_end(&mut self, model: &ModelInfo, epoch: usize, logs: &EpochLogs);

    fn on_train_end(&mut self, _model: &ModelInfo, _logs: &EpochLogs) {}
}

/// Where a callback is in the training lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingState {
    #[default]
    Idle,
    Training,
    Finished,
}

/// Sends a start message, a per-epoch summary, and periodic metric charts to one chat.
///
/// Delivery and rendering failures are logged and dropped; none of the hooks can fail.
pub struct TelegramCallback {
    notifier: TelegramNotifier,
    render: RenderConfig,
    renderer: ChartRenderer,
    tracked: TrackedMetrics,
    state: TrainingState,
}

impl TelegramCallback {
    pub fn new(notifier: TelegramNotifier, render: RenderConfig) -> Self {
        let renderer = ChartRenderer::new(&render);
        Self {
            notifier,
            render,
            renderer,
            tracked: TrackedMetrics::new(),
            state: TrainingState::Idle,
        }
    }

    /// Validate `config` and connect a real Bot API client.
    pub fn from_config(config: &NotifierConfig) -> Result<Self, EpochcastError> {
        config.validate()?;
        let notifier = create_telegram_notifier(config)?;
        Ok(Self::new(notifier, config.render_config()))
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn tracked(&self) -> &TrackedMetrics {
        &self.tracked
    }

    pub fn render_config(&self) -> &RenderConfig {
        &self.render
    }

    /// True on every `plot_n_epochs`-th epoch, counting from one.
    fn plot_due(&self, epoch: usize) -> bool {
        let every = self.render.plot_n_epochs;
        self.render.plot_metrics && every > 0 && epoch % every == every - 1
    }

    /// Render the current history and upload it. Errors stop here.
    fn send_chart(&self, model: &ModelInfo) {
        let path = &self.render.image_path;
        match render_metrics(&self.renderer, &self.tracked, &model.metric_names, path) {
            Ok(spec) => {
                tracing::debug!(model = %model.name, panels = spec.panels.len(), "Chart ready");
                let _ = self.notifier.send_image(path);
            }
            Err(RenderError::EmptyHistory) => {
                tracing::debug!(model = %model.name, "No epochs recorded, chart skipped");
            }
            Err(RenderError::NoMetrics) => {
                tracing::debug!(model = %model.name, "Nothing to chart, chart skipped");
            }
            Err(e) => {
                tracing::warn!(model = %model.name, error = %e, "Chart render failed");
            }
        }
    }
}

impl TrainingCallback for TelegramCallback {
    fn on_train_begin(&mut self, model: &ModelInfo, _logs: &EpochLogs) {
        if self.state != TrainingState::Idle {
            tracing::warn!(state = ?self.state, "on_train_begin ignored");
            return;
        }
        self.state = TrainingState::Training;
        tracing::info!(model = %model.name, "Training started");
        let _ = self
            .notifier
            .send_text(&format!("Start training model {}.", model.name));
    }

    fn on_epoch_end(&mut self, model: &ModelInfo, epoch: usize, logs: &EpochLogs) {
        if self.state != TrainingState::Training {
            tracing::warn!(state = ?self.state, epoch, "on_epoch_end ignored");
            return;
        }
        let _ = self.notifier.send_text(&epoch_summary(epoch, logs));
        self.tracked.record(epoch, logs);
        if self.plot_due(epoch) {
            self.send_chart(model);
        }
    }

    fn on_train_end(&mut self, model: &ModelInfo, _logs: &EpochLogs) {
        if self.state != TrainingState::Training {
            tracing::warn!(state = ?self.state, "on_train_end ignored");
            return;
        }
        self.state = TrainingState::Finished;
        tracing::info!(model = %model.name, epochs = self.tracked.len(), "Training finished");
        if self.render.plot_metrics && !self.tracked.is_empty() {
            self.send_chart(model);
        }
    }
}

/// `"Epoch 3.\nloss: 0.1235;\n"`, keys in report order.
pub fn epoch_summary(epoch: usize, logs: &EpochLogs) -> String {
    let mut text = format!("Epoch {epoch}.\n");
    for (name, value) in logs.iter() {
        let _ = writeln!(text, "{name}: {value:.4};");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatId;
    use crate::error::DeliveryError;
    use crate::telegram::TelegramHttpClient;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Text(String),
        Photo(String),
    }

    #[derive(Default)]
    struct RecordingHttp {
        calls: Arc<Mutex<Vec<Call>>>,
        fail: bool,
    }

    impl TelegramHttpClient for RecordingHttp {
        fn send_message(&self, _chat_id: &ChatId, text: &str) -> Result<i64, DeliveryError> {
            self.calls.lock().unwrap().push(Call::Text(text.to_string()));
            if self.fail {
                return Err(DeliveryError::Http {
                    message: "network unreachable".into(),
                });
            }
            Ok(1)
        }

        fn send_photo(
            &self,
            _chat_id: &ChatId,
            file_name: &str,
            _bytes: Vec<u8>,
        ) -> Result<i64, DeliveryError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Photo(file_name.to_string()));
            if self.fail {
                return Err(DeliveryError::Http {
                    message: "network unreachable".into(),
                });
            }
            Ok(2)
        }
    }

    fn callback(http: RecordingHttp, render: RenderConfig) -> TelegramCallback {
        TelegramCallback::new(TelegramNotifier::new(ChatId::Id(42), Box::new(http)), render)
    }

    fn no_plot() -> RenderConfig {
        RenderConfig {
            plot_metrics: false,
            ..Default::default()
        }
    }

    fn logs(loss: f64) -> EpochLogs {
        EpochLogs::new().with("loss", loss).with("val_loss", loss + 0.1)
    }

    #[test]
    fn test_epoch_summary_format() {
        let logs = EpochLogs::new().with("loss", 0.123456).with("acc", 0.9);
        assert_eq!(epoch_summary(3, &logs), "Epoch 3.\nloss: 0.1235;\nacc: 0.9000;\n");
        assert_eq!(epoch_summary(0, &EpochLogs::new()), "Epoch 0.\n");
    }

    #[test]
    fn test_lifecycle_messages() {
        let http = RecordingHttp::default();
        let calls = http.calls.clone();
        let mut cb = callback(http, no_plot());
        let model = ModelInfo::new("resnet");

        assert_eq!(cb.state(), TrainingState::Idle);
        cb.on_train_begin(&model, &EpochLogs::new());
        assert_eq!(cb.state(), TrainingState::Training);
        cb.on_epoch_end(&model, 0, &EpochLogs::new().with("loss", 0.5));
        cb.on_train_end(&model, &EpochLogs::new());
        assert_eq!(cb.state(), TrainingState::Finished);

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                Call::Text("Start training model resnet.".into()),
                Call::Text("Epoch 0.\nloss: 0.5000;\n".into()),
            ]
        );
    }

    #[test]
    fn test_accumulates_every_epoch() {
        let mut cb = callback(RecordingHttp::default(), no_plot());
        let model = ModelInfo::new("m");
        cb.on_train_begin(&model, &EpochLogs::new());
        for epoch in 0..7 {
            cb.on_epoch_end(&model, epoch, &logs(1.0 / (epoch + 1) as f64));
        }

        let tracked = cb.tracked();
        assert_eq!(tracked.epochs(), &[0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(tracked.series("loss").unwrap().len(), 7);
        assert_eq!(tracked.series("val_loss").unwrap().len(), 7);
        assert_eq!(tracked.series("loss").unwrap()[1], 0.5);
    }

    #[test]
    fn test_transport_failure_does_not_stop_hooks() {
        let http = RecordingHttp {
            fail: true,
            ..Default::default()
        };
        let calls = http.calls.clone();
        let mut cb = callback(http, no_plot());
        let model = ModelInfo::new("m");

        cb.on_train_begin(&model, &EpochLogs::new());
        cb.on_epoch_end(&model, 0, &logs(0.4));
        cb.on_epoch_end(&model, 1, &logs(0.3));
        cb.on_train_end(&model, &EpochLogs::new());

        assert_eq!(calls.lock().unwrap().len(), 3);
        assert_eq!(cb.tracked().len(), 2);
        assert_eq!(cb.state(), TrainingState::Finished);
    }

    #[test]
    fn test_plot_interval() {
        let render = RenderConfig {
            plot_n_epochs: 3,
            ..Default::default()
        };
        let cb = callback(RecordingHttp::default(), render);
        let due: Vec<usize> = (0..9).filter(|&epoch| cb.plot_due(epoch)).collect();
        assert_eq!(due, vec![2, 5, 8]);
    }

    #[test]
    fn test_plot_interval_at_largest_epoch() {
        let render = RenderConfig {
            plot_n_epochs: 3,
            ..Default::default()
        };
        let mut cb = callback(RecordingHttp::default(), render.clone());
        // usize::MAX + 1 is not a multiple of 3.
        assert!(!cb.plot_due(usize::MAX));
        assert!(cb.plot_due(usize::MAX - 1));

        let every = callback(
            RecordingHttp::default(),
            RenderConfig {
                plot_n_epochs: 1,
                ..render
            },
        );
        assert!(every.plot_due(usize::MAX));

        let model = ModelInfo::new("m");
        cb.on_train_begin(&model, &EpochLogs::new());
        cb.on_epoch_end(&model, usize::MAX, &EpochLogs::new().with("loss", 0.5));
        assert_eq!(cb.tracked().epochs(), &[usize::MAX]);
    }

    #[test]
    fn test_charts_sent_on_interval_epochs() {
        if !std::path::Path::new(crate::config::DEFAULT_FONT_PATH).exists() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let render = RenderConfig {
            image_path: dir.path().join("chart.png"),
            figsize: (4.0, 2.0),
            plot_n_epochs: 3,
            ..Default::default()
        };
        let http = RecordingHttp::default();
        let calls = http.calls.clone();
        let mut cb = callback(http, render);
        let model = ModelInfo::new("m");

        cb.on_train_begin(&model, &EpochLogs::new());
        let mut photo_epochs = Vec::new();
        for epoch in 0..9 {
            let before = calls.lock().unwrap().len();
            cb.on_epoch_end(&model, epoch, &logs(1.0 / (epoch + 1) as f64));
            let calls = calls.lock().unwrap();
            if calls[before..].iter().any(|call| matches!(call, Call::Photo(_))) {
                photo_epochs.push(epoch);
            }
        }
        assert_eq!(photo_epochs, vec![2, 5, 8]);
    }

    #[test]
    fn test_nothing_to_chart_sends_no_image() {
        let dir = tempfile::tempdir().unwrap();
        let render = RenderConfig {
            image_path: dir.path().join("chart.jpg"),
            plot_n_epochs: 1,
            ..Default::default()
        };
        let http = RecordingHttp::default();
        let calls = http.calls.clone();
        let mut cb = callback(http, render);
        let model = ModelInfo::new("m");

        cb.on_train_begin(&model, &EpochLogs::new());
        cb.on_epoch_end(&model, 0, &EpochLogs::new().with("val_loss", 0.5).with("lr", 0.1));
        cb.on_train_end(&model, &EpochLogs::new());

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                Call::Text("Start training model m.".into()),
                Call::Text("Epoch 0.\nval_loss: 0.5000;\nlr: 0.1000;\n".into()),
            ]
        );
        assert!(!dir.path().join("chart.jpg").exists());
    }

    #[test]
    fn test_plot_disabled_is_never_due() {
        let cb = callback(RecordingHttp::default(), no_plot());
        assert!((0..300).all(|epoch| !cb.plot_due(epoch)));
    }

    #[test]
    fn test_empty_run_sends_no_image() {
        let dir = tempfile::tempdir().unwrap();
        let render = RenderConfig {
            image_path: dir.path().join("chart.jpg"),
            font_path: PathBuf::from("/nonexistent/font.ttf"),
            ..Default::default()
        };
        let http = RecordingHttp::default();
        let calls = http.calls.clone();
        let mut cb = callback(http, render);
        let model = ModelInfo::new("m");

        cb.on_train_begin(&model, &EpochLogs::new());
        cb.on_train_end(&model, &EpochLogs::new());

        assert_eq!(
            *calls.lock().unwrap(),
            vec![Call::Text("Start training model m.".into())]
        );
        assert!(!dir.path().join("chart.jpg").exists());
    }

    #[test]
    fn test_render_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let render = RenderConfig {
            image_path: dir.path().join("chart.jpg"),
            plot_n_epochs: 1,
            ..Default::default()
        };
        let http = RecordingHttp::default();
        let calls = http.calls.clone();
        let mut cb = callback(http, render);
        // "acc" is declared but never reported, so the chart cannot be built.
        let model = ModelInfo::new("m").with_metrics(["acc"]);

        cb.on_train_begin(&model, &EpochLogs::new());
        cb.on_epoch_end(&model, 0, &logs(0.2));
        cb.on_train_end(&model, &EpochLogs::new());

        let calls = calls.lock().unwrap();
        assert!(calls.iter().all(|call| matches!(call, Call::Text(_))));
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn test_hooks_out_of_order_are_ignored() {
        let http = RecordingHttp::default();
        let calls = http.calls.clone();
        let mut cb = callback(http, no_plot());
        let model = ModelInfo::new("m");

        cb.on_epoch_end(&model, 0, &logs(0.5));
        cb.on_train_end(&model, &EpochLogs::new());
        assert_eq!(cb.state(), TrainingState::Idle);
        assert!(cb.tracked().is_empty());

        cb.on_train_begin(&model, &EpochLogs::new());
        cb.on_train_begin(&model, &EpochLogs::new());
        cb.on_train_end(&model, &EpochLogs::new());
        cb.on_epoch_end(&model, 1, &logs(0.5));

        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(cb.state(), TrainingState::Finished);
    }

    #[test]
    fn test_model_info_with_metrics() {
        let model = ModelInfo::new("bert").with_metrics(["loss", "acc"]);
        assert_eq!(model.metric_names, vec!["loss".to_string(), "acc".to_string()]);
        let json = serde_json::to_string(&TrainingState::Finished).unwrap();
        assert_eq!(json, "\"finished\"");
    }
}

//! Preset execution.
//!
//! A [`Pipeline`] folds a preset's operations over one [`ImageHandle`]:
//! every step takes the current handle by value and returns its replacement,
//! so exactly one handle is live and steps run strictly in declared order.
//!
//! Built-in operation names and their parameters (positional order):
//!
//! | Operation | Parameters |
//! |---|---|
//! | `crop` | `width`, `height`, `start = [0, 0]` |
//! | `resize` | `width`, `height`, `filter = "undefined"` |
//! | `thumbnail` | `width`, `height`, `mode = "inset"` |
//! | `fit` | `width`, `height`, `mode = "inset"` |
//! | `watermark` | `file`, `start = [0, 0]` |
//! | `text` | `text`, `font`, `start = [0, 0]`, `options = { size = 12, color = "fff", angle = 0 }` |
//! | `frame` | `margin = 20`, `color = "666"`, `alpha = 100` |
//!
//! Arguments are parsed and validated into a [`Command`] before the engine is
//! called. A name that is neither built in nor registered as a named callback
//! fails with [`PipelineError::UnknownOperation`] when the step is reached.

mod args;

use crate::imaging::{
    Color, EngineError, FontOptions, ImageEngine, ImageHandle, ParamError, Point, ResizeFilter,
    Size, ThumbnailMode,
};
use crate::preset::{CustomOp, Operation, Preset};
use args::Args;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown operation \"{0}\"")]
    UnknownOperation(String),
    #[error("Invalid argument for {operation}: {message}")]
    InvalidArgument { operation: String, message: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{operation} failed: {message}")]
    Callback { operation: String, message: String },
}

impl PipelineError {
    /// Error for custom callbacks to return.
    pub fn callback(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Callback {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// What a custom step can see besides the image.
pub struct PipelineContext<'a> {
    pub engine: &'a dyn ImageEngine,
    /// Name of the preset being run.
    pub preset: &'a str,
    /// Source file, when the image came from disk.
    pub source: Option<&'a Path>,
    /// Directory relative watermark and font paths resolve against.
    pub asset_root: &'a Path,
    /// Arguments from the preset entry, for callbacks registered by name.
    pub args: Option<&'a toml::Value>,
}

/// A built-in operation with validated parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Crop { size: Size, start: Point },
    Resize { size: Size, filter: ResizeFilter },
    Thumbnail { size: Size, mode: ThumbnailMode },
    Fit { size: Size, mode: ThumbnailMode },
    Watermark { file: PathBuf, start: Point },
    Text { text: String, font: PathBuf, start: Point, options: FontOptions },
    Frame { margin: u32, color: Color },
}

const BOX_PARAMS: &[&str] = &["width", "height", "mode"];

impl Command {
    /// Parse a built-in step. Returns `Ok(None)` when `name` is not built in.
    pub fn parse(name: &str, raw: &toml::Value) -> Result<Option<Self>, PipelineError> {
        let command = match name {
            "crop" => {
                let args = Args::bind(name, &["width", "height", "start"], raw)?;
                Command::Crop {
                    size: size(&args)?,
                    start: args.point("start")?,
                }
            }
            "resize" => {
                let args = Args::bind(name, &["width", "height", "filter"], raw)?;
                let filter = args.string_or("filter", "undefined")?;
                Command::Resize {
                    size: size(&args)?,
                    filter: ResizeFilter::parse(filter).map_err(|e| args.param_error(e))?,
                }
            }
            "thumbnail" => {
                let args = Args::bind(name, BOX_PARAMS, raw)?;
                Command::Thumbnail {
                    size: size(&args)?,
                    mode: mode(&args)?,
                }
            }
            "fit" => {
                let args = Args::bind(name, BOX_PARAMS, raw)?;
                Command::Fit {
                    size: size(&args)?,
                    mode: mode(&args)?,
                }
            }
            "watermark" => {
                let args = Args::bind(name, &["file", "start"], raw)?;
                Command::Watermark {
                    file: PathBuf::from(args.string("file")?),
                    start: args.point("start")?,
                }
            }
            "text" => {
                let args = Args::bind(name, &["text", "font", "start", "options"], raw)?;
                Command::Text {
                    text: args.string("text")?.to_string(),
                    font: PathBuf::from(args.string("font")?),
                    start: args.point("start")?,
                    options: args.font_options("options")?,
                }
            }
            "frame" => {
                let args = Args::bind(name, &["margin", "color", "alpha"], raw)?;
                let margin = args.int_or("margin", 20)?;
                let margin = u32::try_from(margin).map_err(|_| {
                    args.param_error(ParamError(format!(
                        "margin must be a non-negative integer, got {margin}"
                    )))
                })?;
                let alpha = args.int_or("alpha", 100)?;
                let alpha = u8::try_from(alpha)
                    .ok()
                    .filter(|a| *a <= 100)
                    .ok_or_else(|| {
                        args.param_error(ParamError(format!("alpha must be 0-100, got {alpha}")))
                    })?;
                let color = Color::parse(args.string_or("color", "666")?, alpha)
                    .map_err(|e| args.param_error(e))?;
                Command::Frame { margin, color }
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    fn apply(
        self,
        engine: &dyn ImageEngine,
        image: ImageHandle,
        asset_root: &Path,
    ) -> Result<ImageHandle, EngineError> {
        match self {
            Command::Crop { size, start } => engine.crop(image, size, start),
            Command::Resize { size, filter } => engine.resize(image, size, filter),
            Command::Thumbnail { size, mode } => engine.thumbnail(image, size, mode),
            Command::Fit { size, mode } => engine.fit(image, size, mode),
            Command::Watermark { file, start } => {
                engine.watermark(image, &asset_root.join(file), start)
            }
            Command::Text {
                text,
                font,
                start,
                options,
            } => engine.text(image, &text, &asset_root.join(font), start, &options),
            Command::Frame { margin, color } => engine.frame(image, margin, color),
        }
    }
}

fn size(args: &Args<'_>) -> Result<Size, PipelineError> {
    Size::new(args.int("width")?, args.int("height")?).map_err(|e| args.param_error(e))
}

fn mode(args: &Args<'_>) -> Result<ThumbnailMode, PipelineError> {
    ThumbnailMode::parse(args.string_or("mode", "inset")?).map_err(|e| args.param_error(e))
}

/// Runs presets against an injected engine.
pub struct Pipeline {
    engine: Arc<dyn ImageEngine>,
    asset_root: PathBuf,
    callbacks: HashMap<String, CustomOp>,
}

impl Pipeline {
    pub fn new(engine: Arc<dyn ImageEngine>, asset_root: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            asset_root: asset_root.into(),
            callbacks: HashMap::new(),
        }
    }

    /// Make `name` usable as an operation in configured presets. Built-in
    /// names take precedence.
    pub fn with_callback(mut self, name: impl Into<String>, op: CustomOp) -> Self {
        self.callbacks.insert(name.into(), op);
        self
    }

    pub fn engine(&self) -> &dyn ImageEngine {
        self.engine.as_ref()
    }

    /// Open `source` and run `preset` on it.
    pub fn open_and_run(&self, source: &Path, preset: &Preset) -> Result<ImageHandle, PipelineError> {
        let image = self.engine.open(source)?;
        self.run(image, preset, Some(source))
    }

    /// Apply every operation of `preset` in order.
    pub fn run(
        &self,
        image: ImageHandle,
        preset: &Preset,
        source: Option<&Path>,
    ) -> Result<ImageHandle, PipelineError> {
        let ctx = PipelineContext {
            engine: self.engine.as_ref(),
            preset: preset.name(),
            source,
            asset_root: &self.asset_root,
            args: None,
        };
        preset
            .operations()
            .iter()
            .try_fold(image, |image, op| self.apply(image, op, &ctx))
    }

    fn apply(
        &self,
        image: ImageHandle,
        op: &Operation,
        ctx: &PipelineContext<'_>,
    ) -> Result<ImageHandle, PipelineError> {
        trace!(preset = ctx.preset, operation = op.label(), size = ?image.dimensions(), "applying");
        match op {
            Operation::Custom(custom) => custom.call(image, ctx),
            Operation::Builtin { name, args } => {
                if let Some(command) = Command::parse(name, args)? {
                    return Ok(command.apply(ctx.engine, image, ctx.asset_root)?);
                }
                let custom = self
                    .callbacks
                    .get(name)
                    .ok_or_else(|| PipelineError::UnknownOperation(name.clone()))?;
                let named_ctx = PipelineContext {
                    args: Some(args),
                    ..*ctx
                };
                custom.call(image, &named_ctx)
            }
        }
    }
}

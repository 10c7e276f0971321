use clap::Parser;
use env_logger::Env;
use ocg_compose::{
    ComposeOptions, DEFAULT_LAYER_NAME, MatchMode, OcgSpec, Rect, SaveOptions, StackOrder,
    compose_files,
};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;

/// Place raster artwork into a PDF template under a named layer (OCG)
#[derive(Parser, Debug)]
#[command(name = "ocg-compose", version, about = "Place artwork into a PDF template layer")]
struct Args {
    /// Template PDF
    #[arg(value_name = "TEMPLATE")]
    template: PathBuf,
    /// Artwork image (PNG, JPEG, ...)
    #[arg(value_name = "ARTWORK")]
    artwork: PathBuf,
    /// Output PDF
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,
    /// Target layer name (default: "ARTWORK HERE")
    #[arg(value_name = "LAYER", default_value = DEFAULT_LAYER_NAME)]
    layer: String,
    /// Zero-based page index
    #[arg(long, default_value_t = 0)]
    page: usize,
    /// Paint under or over the existing page content
    #[arg(long, value_enum, default_value_t = StackOrder::Under)]
    stack: StackOrder,
    /// Keep the image aspect ratio instead of stretching to fill
    #[arg(long, default_value_t = false)]
    keep_proportion: bool,
    /// Only accept an exact (case-insensitive) layer name match
    #[arg(long, default_value_t = false)]
    exact: bool,
    /// Placement rectangle "x0,y0,x1,y1" in points (default: page MediaBox)
    #[arg(long)]
    rect: Option<Rect>,
    /// Create the layer hidden by default
    #[arg(long, default_value_t = false)]
    hidden: bool,
    /// Intent of a created layer
    #[arg(long, default_value = "Design")]
    intent: String,
    /// CreatorInfo subtype of a created layer
    #[arg(long, default_value = "Artwork")]
    usage: String,
    /// Append an incremental update instead of rewriting the file
    #[arg(long, default_value_t = false)]
    incremental: bool,
    /// Keep unreferenced objects
    #[arg(long, default_value_t = false)]
    no_compact: bool,
    /// Leave uncompressed streams as they are
    #[arg(long, default_value_t = false)]
    no_deflate: bool,
    /// Silence the diagnostic log
    #[arg(long, short, default_value_t = false)]
    quiet: bool,
}

impl Args {
    fn options(&self) -> ComposeOptions {
        let save = if self.incremental {
            SaveOptions {
                compact_unreferenced: !self.no_compact,
                ..SaveOptions::incremental()
            }
        } else {
            SaveOptions {
                compact_unreferenced: !self.no_compact,
                recompress_streams: !self.no_deflate,
                rebuild_xref: true,
            }
        };
        ComposeOptions {
            layer: OcgSpec {
                name: self.layer.clone(),
                default_visible: !self.hidden,
                intent: Some(self.intent.clone()),
                usage: Some(self.usage.clone()),
            },
            match_mode: if self.exact { MatchMode::Exact } else { MatchMode::Lenient },
            page_index: self.page,
            rect: self.rect,
            stack_order: self.stack,
            keep_proportion: self.keep_proportion,
            save,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.quiet { "off" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_target(false)
        .init();

    match compose_files(&args.template, &args.artwork, &args.output, &args.options()) {
        Ok(_) => {
            println!(
                "{}",
                json!({ "success": true, "output": args.output.display().to_string() })
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            println!(
                "{}",
                json!({ "success": false, "error": e.kind(), "message": e.to_string() })
            );
            ExitCode::FAILURE
        }
    }
}

//! Loupe Pick — sample a color from the screen from a terminal.
//!
//! Move the pointer to sample, `+` / `-` to zoom, click to pick, Escape to
//! cancel. The picked color is printed and copied to the clipboard.
//!
//! Usage:
//!   loupe-pick                     Print hovers and the picked color
//!   loupe-pick --quiet             Print only the picked color
//!   loupe-pick --png <file.png>    Also save the last loupe image
//!
//! Exit code is 0 on a pick, 1 on cancel, 2 when capture is unavailable.

use color_loupe_lib::capture::{primary_height, top_left_to_screen};
use color_loupe_lib::session::SamplerParts;
use color_loupe_lib::{
    encode_png, render_loupe, sample, FrameSource, InputSender, LoupeView, OverlayPlan, Point,
    SamplerConfig, XcapSource,
};
use device_query::{DeviceQuery, DeviceState, Keycode};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const POLL_INTERVAL_MS: u64 = 8;
/// Scroll delta sent per `+` / `-` press, well past the default deadband.
const KEY_SCROLL_DELTA: f64 = 4.0;
const LEFT_BUTTON: usize = 1;

struct Args {
    png: Option<PathBuf>,
    quiet: bool,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut parsed = Args {
        png: None,
        quiet: false,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--quiet" | "-q" => parsed.quiet = true,
            "--png" => match iter.next() {
                Some(path) => parsed.png = Some(PathBuf::from(path)),
                None => usage_and_exit(),
            },
            _ => usage_and_exit(),
        }
    }
    parsed
}

fn usage_and_exit() -> ! {
    eprintln!("Usage:");
    eprintln!("  loupe-pick [--quiet] [--png <file.png>]");
    std::process::exit(2);
}

/// Edge-triggered pointer and keyboard polling.
struct InputPoller {
    device: DeviceState,
    primary_height: f64,
    last_coords: (i32, i32),
    last_keys: Vec<Keycode>,
    was_pressed: bool,
}

impl InputPoller {
    fn new(primary_height: f64) -> Self {
        let device = DeviceState::new();
        let mouse = device.get_mouse();
        Self {
            last_coords: mouse.coords,
            was_pressed: mouse.button_pressed.get(LEFT_BUTTON).copied().unwrap_or(false),
            last_keys: device.get_keys(),
            device,
            primary_height,
        }
    }

    fn pointer(&self) -> Point {
        let (x, y) = self.last_coords;
        top_left_to_screen(x as f64, y as f64, self.primary_height)
    }

    fn poll(&mut self, input: &InputSender) {
        let mouse = self.device.get_mouse();
        if mouse.coords != self.last_coords {
            self.last_coords = mouse.coords;
            input.pointer_moved(self.pointer());
        }

        let keys = self.device.get_keys();
        for key in keys.iter().filter(|k| !self.last_keys.contains(k)) {
            match key {
                Keycode::Escape => {
                    input.escape();
                }
                Keycode::Equal => {
                    input.scroll(-KEY_SCROLL_DELTA);
                }
                Keycode::Minus => {
                    input.scroll(KEY_SCROLL_DELTA);
                }
                _ => {}
            }
        }
        self.last_keys = keys;

        let pressed = mouse.button_pressed.get(LEFT_BUTTON).copied().unwrap_or(false);
        if pressed && !self.was_pressed {
            input.click();
        }
        self.was_pressed = pressed;
    }
}

fn save_png(path: &Path, view: &LoupeView, config: &SamplerConfig) {
    let plan = OverlayPlan::for_view(view, config);
    let result = render_loupe(view, &plan, 2.0).and_then(|image| encode_png(&image));
    match result {
        Ok(bytes) => match std::fs::write(path, &bytes) {
            Ok(()) => log::info!("[PICK] Saved loupe to {} ({} bytes)", path.display(), bytes.len()),
            Err(e) => eprintln!("Failed to write {}: {}", path.display(), e),
        },
        Err(e) => eprintln!("Failed to render loupe: {}", e),
    }
}

fn copy_to_clipboard(text: &str) {
    match arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_text(text.to_string())) {
        Ok(()) => log::info!("[PICK] Copied {} to clipboard", text),
        Err(e) => log::warn!("[PICK] Clipboard unavailable: {}", e),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    let args = parse_args();

    let config = match SamplerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let source = XcapSource::new(config.frame_interval());
    let displays = match source.displays() {
        Ok(displays) => displays,
        Err(e) => {
            eprintln!("Screen capture unavailable: {}", e);
            std::process::exit(2);
        }
    };

    let mut poller = InputPoller::new(primary_height(&displays).unwrap_or(0.0));
    let start = Instant::now();

    let sampler = match sample(source, config.clone(), poller.pointer()) {
        Ok(sampler) => sampler,
        Err(e) => {
            eprintln!("Could not start sampling: {}", e);
            std::process::exit(2);
        }
    };
    log::info!("[PICK] Sampler ready in {}ms", start.elapsed().as_millis());

    let SamplerParts {
        input,
        mut hovers,
        views,
        mut selection,
    } = sampler.into_parts();

    let mut ticker = tokio::time::interval(Duration::from_millis(POLL_INTERVAL_MS));
    let mut last_view: Option<LoupeView> = None;

    let picked = loop {
        tokio::select! {
            outcome = &mut selection => break outcome,
            Some(color) = hovers.next() => {
                if let Some(view) = views.borrow().as_ref() {
                    last_view = Some(view.clone());
                }
                if !args.quiet {
                    let text = config.describe(&color).unwrap_or_else(|| color.to_hex());
                    println!("{}", text);
                }
            }
            _ = ticker.tick() => poller.poll(&input),
        }
    };

    match picked {
        Some(color) => {
            let text = config.describe(&color).unwrap_or_else(|| color.to_hex());
            println!("{}", text);
            copy_to_clipboard(&text);
            if let (Some(path), Some(view)) = (args.png.as_ref(), last_view.as_ref()) {
                save_png(path, view, &config);
            }
        }
        None => {
            eprintln!("Cancelled");
            std::process::exit(1);
        }
    }
}

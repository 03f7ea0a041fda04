use std::fs;

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};

/// Concise console log plus a verbose `logs/<name>.log` file. Falls
/// back to console-only when the log directory cannot be created.
pub fn init_logging(name: &str) {
    let term: Box<dyn SharedLogger> = TermLogger::new(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );

    let mut sinks: Vec<Box<dyn SharedLogger>> = vec![term];
    match fs::create_dir_all("logs").and_then(|_| {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(format!("logs/{}.log", name))
    }) {
        Ok(file) => sinks.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file)),
        Err(e) => eprintln!("warning: file log unavailable ({}); console only", e),
    }

    if let Err(e) = CombinedLogger::init(sinks) {
        eprintln!("warning: logger already initialized: {}", e);
    }
}

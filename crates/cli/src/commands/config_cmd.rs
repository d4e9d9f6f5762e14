//! `vigil config`: configuration management commands.

use anyhow::Context;
use vigil_config::SdkConfig;

pub fn validate() -> anyhow::Result<()> {
    println!("Validating configuration...");

    let config = match SdkConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    let mut warnings = Vec::new();
    if !config.session.enabled {
        warnings.push("Session tracking is disabled");
    }
    if !config.logs.enabled && !config.metrics.enabled {
        warnings.push("Both logs and metrics are disabled; nothing will be batched");
    }
    if config.logs.background_flush_timeout_ms > config.logs.close_grace_ms {
        warnings.push("logs.background_flush_timeout_ms exceeds logs.close_grace_ms");
    }
    if config.frames.frozen_frame_threshold_ms < 100 {
        warnings.push("frames.frozen_frame_threshold_ms is unusually low");
    }

    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Session interval: {}ms", config.session.session_interval_ms);
    println!(
        "   Logs:             {} (batch {}, every {}ms)",
        on_off(config.logs.enabled),
        config.logs.max_batch_size,
        config.logs.flush_interval_ms
    );
    println!(
        "   Metrics:          {} (batch {}, every {}ms)",
        on_off(config.metrics.enabled),
        config.metrics.max_batch_size,
        config.metrics.flush_interval_ms
    );
    println!(
        "   Frames:           {} (frozen > {}ms)",
        on_off(config.frames.enabled),
        config.frames.frozen_frame_threshold_ms
    );
    println!("   Max app start:    {}ms", config.app_start.max_duration_ms);

    Ok(())
}

pub fn show() -> anyhow::Result<()> {
    let config = SdkConfig::load().context("Failed to load config")?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path() {
    let config_path = SdkConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
}

pub fn init() {
    print!("{}", SdkConfig::default_toml());
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "enabled" } else { "disabled" }
}

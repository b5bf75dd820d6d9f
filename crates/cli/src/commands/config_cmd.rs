//! `windlass config` — Configuration management commands.

use std::path::{Path, PathBuf};
use windlass_config::{EngineConfig, MarksBackend};

fn config_file(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| EngineConfig::config_dir().join("config.toml"))
}

pub async fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match super::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ {e}");
            return Err(e);
        }
    };
    println!("   ✅ Config parsed successfully");

    let mut warnings = Vec::new();
    if config.budget.max_context_tokens < 1_000 {
        warnings.push("Token budget below 1000; most turns will escalate");
    }
    if config.continuation.max_continuations == 0 {
        warnings.push("Continuation disabled; truncated replies end the turn");
    }
    if config.marks.backend == MarksBackend::Memory {
        warnings.push("Memory mark backend: marks are lost when the process exits");
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Budget:        {} tokens", config.budget.max_context_tokens);
    println!("   Counter:       {:?}", config.budget.counter);
    println!("   Holdback:      {} chars", config.decoder.holdback_chars);
    println!("   Continuations: {}", config.continuation.max_continuations);
    println!("   Marks:         {}", config.marks.resolved_dir().display());
    println!("   Tools:         {}", config.tools.len());

    Ok(())
}

pub async fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    println!("{}", config.to_toml());
    Ok(())
}

pub async fn path(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_file(config_path).display());
    Ok(())
}

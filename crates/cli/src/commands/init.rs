//! `promptweave init` — Print or write the default configuration.

use promptweave_config::AssemblyConfig;

pub async fn run(write: bool) -> Result<(), Box<dyn std::error::Error>> {
    let toml = AssemblyConfig::default_toml();
    if !write {
        print!("{toml}");
        return Ok(());
    }

    let config_dir = AssemblyConfig::config_dir();
    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        println!("  Config already exists: {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, toml)?;
    println!("✅ Wrote default config to {}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use promptweave_config::AssemblyConfig;

    #[test]
    fn default_toml_parses_back() {
        let toml = AssemblyConfig::default_toml();
        let config = AssemblyConfig::from_toml(&toml).unwrap();
        assert_eq!(config.world_info.default_depth, 4);
    }
}

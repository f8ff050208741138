use std::fs;
use std::io::BufRead;

use crate::config;

#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub prompt_format: Option<String>,
    pub color: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt_format: None,
            color: true,
        }
    }
}

impl ShellConfig {
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(config_file) = config::config_file() {
            if let Ok(file) = fs::File::open(&config_file) {
                let reader = std::io::BufReader::new(file);
                for line in reader.lines().map_while(Result::ok) {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((key, value)) = line.split_once('=') {
                        match key.trim() {
                            "prompt" => config.prompt_format = Some(value.trim().to_string()),
                            "color" => config.color = value.trim().parse().unwrap_or(true),
                            _ => {}
                        }
                    }
                }
            }
        }

        config
    }
}

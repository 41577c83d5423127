use crate::models::UserConfig;
use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::sync::{Mutex, PoisonError};

/// Default configuration directory, relative to the working directory
pub const DEFAULT_CONFIG_DIR: &str = "DocHandler Data";

const USER_CONFIG_FILE: &str = "DocHandler Config.yaml";
const FILE_NAME_PORTIONS_FILE: &str = "file_name_portions.txt";
const COMPANY_NAMES_FILE: &str = "company_names.txt";

/// Serializes read-modify-write updates of the list files
static LIST_LOCK: Mutex<()> = Mutex::new(());

/// Configuration manager for the settings file and the name lists next to it.
///
/// Manages three files in the configuration directory:
/// - User config (`DocHandler Config.yaml`): processor, engine and filing settings
/// - Filename portions (`file_name_portions.txt`): scope-of-work prefixes, one per line
/// - Company names (`company_names.txt`): known companies for filename tagging
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    user_config_path: Utf8PathBuf,
    portions_path: Utf8PathBuf,
    company_names_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing configuration files (e.g., "DocHandler Data")
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            user_config_path: config_dir.join(USER_CONFIG_FILE),
            portions_path: config_dir.join(FILE_NAME_PORTIONS_FILE),
            company_names_path: config_dir.join(COMPANY_NAMES_FILE),
            config_dir,
        })
    }

    /// Load the user configuration file.
    ///
    /// # Returns
    /// The loaded UserConfig, or default if file doesn't exist
    pub fn load_user_config(&self) -> Result<UserConfig> {
        if !self.user_config_path.exists() {
            tracing::warn!(
                "User config file not found at {}, using defaults",
                self.user_config_path
            );
            return Ok(UserConfig::default());
        }

        let file_contents = fs::read_to_string(&self.user_config_path)
            .with_context(|| format!("Failed to read user config: {}", self.user_config_path))?;

        let config: UserConfig = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse user config: {}", self.user_config_path))?;

        tracing::info!("Loaded user config from {}", self.user_config_path);
        Ok(config)
    }

    /// Save the user configuration file.
    ///
    /// # Arguments
    /// * `config` - The UserConfig to save
    pub fn save_user_config(&self, config: &UserConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize user config to YAML")?;

        fs::write(&self.user_config_path, yaml_string)
            .with_context(|| format!("Failed to write user config: {}", self.user_config_path))?;

        tracing::info!("Saved user config to {}", self.user_config_path);
        Ok(())
    }

    /// Load the scope-of-work filename portions, in file order
    pub fn load_file_name_portions(&self) -> Result<Vec<String>> {
        let portions = read_lines(&self.portions_path)?;
        tracing::info!(
            "Loaded {} filename portions from {}",
            portions.len(),
            self.portions_path
        );
        Ok(portions)
    }

    pub fn save_file_name_portions(&self, portions: &[String]) -> Result<()> {
        write_lines(&self.portions_path, portions)
    }

    /// Append a filename portion unless it is already listed (case-insensitive).
    ///
    /// # Returns
    /// `true` if the portion was added
    pub fn add_file_name_portion(&self, portion: &str) -> Result<bool> {
        let portion = portion.trim();
        if portion.is_empty() {
            bail!("Filename portion cannot be empty");
        }

        let _lock = LIST_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let mut portions = self.load_file_name_portions()?;
        if contains_ignore_case(&portions, portion) {
            return Ok(false);
        }

        portions.push(portion.to_string());
        self.save_file_name_portions(&portions)?;

        tracing::info!("Added new filename portion: {}", portion);
        Ok(true)
    }

    /// Load known company names, sorted
    pub fn load_company_names(&self) -> Result<Vec<String>> {
        let mut names = read_lines(&self.company_names_path)?;
        names.sort();
        tracing::info!("Loaded {} company names", names.len());
        Ok(names)
    }

    /// Add a company name unless it is already known (case-insensitive).
    ///
    /// # Returns
    /// `true` if the name was added
    pub fn add_company_name(&self, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Company name cannot be empty");
        }

        let _lock = LIST_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names = self.load_company_names()?;
        if contains_ignore_case(&names, name) {
            return Ok(false);
        }

        names.push(name.to_string());
        names.sort();
        write_lines(&self.company_names_path, &names)?;

        tracing::info!("Added new company name: {}", name);
        Ok(true)
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}

/// Non-empty trimmed lines of a list file; a missing file is an empty list
fn read_lines(path: &Utf8Path) -> Result<Vec<String>> {
    if !path.exists() {
        tracing::warn!("List file not found: {}", path);
        return Ok(Vec::new());
    }

    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read list file: {}", path))?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

fn contains_ignore_case(lines: &[String], value: &str) -> bool {
    let lowered = value.to_lowercase();
    lines.iter().any(|line| line.to_lowercase() == lowered)
}

fn write_lines(path: &Utf8Path, lines: &[String]) -> Result<()> {
    let mut contents = lines.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    fs::write(path, contents).with_context(|| format!("Failed to write list file: {}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(&config_path).unwrap();
        (manager, temp_dir)
    }

    #[test]
    fn test_create_config_manager_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = Utf8PathBuf::try_from(temp_dir.path().join("DocHandler Data")).unwrap();

        let manager = ConfigManager::new(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(manager.config_dir(), nested);
    }

    #[test]
    fn test_load_save_user_config() {
        let (manager, _temp_dir) = create_test_config_manager();

        let mut config = UserConfig::default();
        config.settings.engine_retries = 5;
        manager.save_user_config(&config).unwrap();

        let loaded = manager.load_user_config().unwrap();
        assert_eq!(loaded.settings.engine_retries, 5);
        assert_eq!(loaded.settings.poll_interval_ms, 1000);
    }

    #[test]
    fn test_missing_lists_are_empty() {
        let (manager, _temp_dir) = create_test_config_manager();
        assert!(manager.load_file_name_portions().unwrap().is_empty());
        assert!(manager.load_company_names().unwrap().is_empty());
    }

    #[test]
    fn test_add_company_name_dedupes_case_insensitively() {
        let (manager, _temp_dir) = create_test_config_manager();

        assert!(manager.add_company_name("Zenith Builders").unwrap());
        assert!(manager.add_company_name("  Acme Concrete ").unwrap());
        assert!(!manager.add_company_name("ACME CONCRETE").unwrap());

        assert_eq!(
            manager.load_company_names().unwrap(),
            vec!["Acme Concrete".to_string(), "Zenith Builders".to_string()]
        );
    }

    #[test]
    fn test_concurrent_company_additions_all_persist() {
        let (manager, _temp_dir) = create_test_config_manager();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = manager.clone();
                std::thread::spawn(move || manager.add_company_name(&format!("Company {}", i)).unwrap())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        assert_eq!(manager.load_company_names().unwrap().len(), 8);
    }

    #[test]
    fn test_add_file_name_portion_appends_once() {
        let (manager, _temp_dir) = create_test_config_manager();
        manager
            .save_file_name_portions(&["02-4100 - Demolition".to_string()])
            .unwrap();

        assert!(manager.add_file_name_portion(" 01-1000 - General ").unwrap());
        assert!(!manager.add_file_name_portion("02-4100 - DEMOLITION").unwrap());
        assert!(manager.add_file_name_portion("").is_err());

        assert_eq!(
            manager.load_file_name_portions().unwrap(),
            vec!["02-4100 - Demolition".to_string(), "01-1000 - General".to_string()]
        );
    }

    #[test]
    fn test_add_empty_company_name_fails() {
        let (manager, _temp_dir) = create_test_config_manager();
        assert!(manager.add_company_name("   ").is_err());
    }
}

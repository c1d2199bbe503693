use crate::uploads::{MediaKind, MediaType};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_MAX_FILES: usize = 10;
pub const DEFAULT_FOLDER: &str = "verification-media";
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 15;

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPolicyConfig {
    /// Exact accepted MIME types; `image/*` style wildcards are allowed
    #[serde(default = "default_accepted_types")]
    pub accepted_types: Vec<String>,
    #[serde(default = "default_image_max_bytes")]
    pub image_max_bytes: u64,
    #[serde(default = "default_pdf_max_bytes")]
    pub pdf_max_bytes: u64,
    #[serde(default = "default_video_max_bytes")]
    pub video_max_bytes: u64,
}

fn default_accepted_types() -> Vec<String> {
    vec![
        "image/jpeg".to_string(),
        "image/png".to_string(),
        "image/webp".to_string(),
        "image/gif".to_string(),
        "application/pdf".to_string(),
        "video/mp4".to_string(),
        "video/quicktime".to_string(),
        "video/webm".to_string(),
    ]
}

fn default_image_max_bytes() -> u64 {
    10 * MB
}

fn default_pdf_max_bytes() -> u64 {
    20 * MB
}

fn default_video_max_bytes() -> u64 {
    100 * MB
}

impl Default for UploadPolicyConfig {
    fn default() -> Self {
        Self {
            accepted_types: default_accepted_types(),
            image_max_bytes: default_image_max_bytes(),
            pdf_max_bytes: default_pdf_max_bytes(),
            video_max_bytes: default_video_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionConfig {
    #[serde(default = "default_compression_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
}

fn default_compression_max_bytes() -> u64 {
    MB
}

fn default_max_dimension() -> u32 {
    1280
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_compression_max_bytes(),
            max_dimension: default_max_dimension(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploaderConfig {
    pub api_key: Option<String>,
    pub server_url: Option<String>,
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default)]
    pub policy: UploadPolicyConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    /// Document categories a verifier may attach
    #[serde(default = "default_media_types")]
    pub media_types: Vec<MediaType>,
    /// Keys of the media types every submission must include
    #[serde(default)]
    pub required_types: Vec<String>,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

fn default_folder() -> String {
    DEFAULT_FOLDER.to_string()
}

fn default_max_files() -> usize {
    DEFAULT_MAX_FILES
}

fn default_health_check_interval_secs() -> u64 {
    DEFAULT_HEALTH_CHECK_INTERVAL_SECS
}

fn default_media_types() -> Vec<MediaType> {
    vec![
        MediaType::new("survey_plan", MediaKind::Pdf, "Survey Plan"),
        MediaType::new("cofo", MediaKind::Pdf, "CofO"),
        MediaType::new("site_photo", MediaKind::Image, "Site Photo"),
        MediaType::new("walkthrough", MediaKind::Video, "Site Walkthrough"),
    ]
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            server_url: None,
            folder: default_folder(),
            max_files: default_max_files(),
            policy: UploadPolicyConfig::default(),
            compression: CompressionConfig::default(),
            media_types: default_media_types(),
            required_types: Vec::new(),
            health_check_interval_secs: default_health_check_interval_secs(),
        }
    }
}

impl UploaderConfig {
    /// Resolve `required_types` keys against the configured media types.
    /// Unknown keys are reported as a configuration error.
    pub fn resolve_required_types(&self) -> Result<Vec<MediaType>, crate::error::UploadError> {
        self.required_types
            .iter()
            .map(|key| {
                self.media_types
                    .iter()
                    .find(|t| &t.key == key)
                    .cloned()
                    .ok_or_else(|| {
                        crate::error::UploadError::Config(format!(
                            "required type '{}' is not a configured media type",
                            key
                        ))
                    })
            })
            .collect()
    }
}

pub fn get_config_dir() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(home_dir) = dirs::home_dir() {
        Ok(home_dir.join(".verifydesk"))
    } else {
        Err("Could not find home directory".into())
    }
}

pub fn get_config_file_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
    Ok(get_config_dir()?.join("config.json"))
}

fn ensure_private_dir(dir: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;

        // Set permissions to 700 (read/write/execute for owner only) on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = fs::metadata(dir)?;
            let mut permissions = metadata.permissions();
            permissions.set_mode(0o700);
            fs::set_permissions(dir, permissions)?;
        }
    }
    Ok(())
}

pub fn ensure_config_dir() -> Result<(), Box<dyn std::error::Error>> {
    ensure_private_dir(&get_config_dir()?)
}

pub fn load_config() -> Result<UploaderConfig, Box<dyn std::error::Error>> {
    ensure_config_dir()?;
    load_config_from(&get_config_file_path()?)
}

pub fn load_config_from(config_file: &PathBuf) -> Result<UploaderConfig, Box<dyn std::error::Error>> {
    if config_file.exists() {
        let content = fs::read_to_string(config_file)?;
        let config: UploaderConfig = serde_json::from_str(&content)?;
        Ok(config)
    } else {
        Ok(UploaderConfig::default())
    }
}

pub fn save_config(config: &UploaderConfig) -> Result<(), Box<dyn std::error::Error>> {
    ensure_config_dir()?;
    save_config_to(config, &get_config_file_path()?)
}

pub fn save_config_to(
    config: &UploaderConfig,
    config_file: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let content = serde_json::to_string_pretty(config)?;

    fs::write(config_file, content)?;

    // Set permissions to 600 (read/write for owner only) on Unix systems
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = fs::metadata(config_file)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(config_file, permissions)?;
    }

    Ok(())
}

pub fn clear_config() -> Result<(), Box<dyn std::error::Error>> {
    let default_config = UploaderConfig::default();
    save_config(&default_config)
}

pub fn get_logs_dir() -> Result<PathBuf, Box<dyn std::error::Error>> {
    Ok(get_config_dir()?.join("logs"))
}

pub fn ensure_logs_dir() -> Result<(), Box<dyn std::error::Error>> {
    ensure_private_dir(&get_logs_dir()?)
}

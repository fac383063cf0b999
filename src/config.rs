//! Configuration file support.
//!
//! Every setting has a default matching the stock label layout, so the
//! configuration file itself is optional.

use std::time::Duration;

use clap::Args;

use crate::{async_utils::io::read_json_or_toml, prelude::*};

/// Name of the configuration file we look for in the base directory.
pub const DEFAULT_CONFIG_FILE: &str = "partnum-ocr.toml";

/// Options shared by every subcommand that needs a [`Config`].
#[derive(Args, Clone, Debug)]
pub struct ConfigOpts {
    /// Directory that relative paths in the configuration are resolved
    /// against.
    #[clap(long, default_value = ".")]
    pub base_dir: PathBuf,

    /// Path to a TOML or JSON configuration file. Defaults to
    /// `partnum-ocr.toml` in the base directory, if it exists.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Override the URL of the OCR service.
    #[clap(long, env = "OCR_API_URL")]
    pub ocr_url: Option<String>,
}

impl ConfigOpts {
    /// Load our configuration, applying command-line overrides.
    #[instrument(level = "debug", skip_all)]
    pub async fn load(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => read_json_or_toml::<Config>(path)
                .await
                .with_context(|| format!("cannot load configuration {:?}", path))?,
            None => {
                let path = self.base_dir.join(DEFAULT_CONFIG_FILE);
                if path.is_file() {
                    read_json_or_toml::<Config>(&path).await.with_context(|| {
                        format!("cannot load configuration {:?}", path)
                    })?
                } else {
                    debug!("No {:?} found, using defaults", path);
                    Config::default()
                }
            }
        };
        config.base_dir = self.base_dir.clone();
        if let Some(url) = &self.ocr_url {
            config.ocr.url = url.clone();
        }
        Ok(config)
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base directory for relative paths. Set from the command line, never
    /// from the file.
    #[serde(skip)]
    pub base_dir: PathBuf,

    /// Where our inputs and outputs live.
    pub paths: PathsConfig,

    /// How to reach the OCR service.
    pub ocr: OcrConfig,

    /// Which region holds which field.
    pub fields: FieldLayout,

    /// Column names in the brand mapping table.
    pub brand_map: BrandMapColumns,

    /// Directory watching.
    pub watch: WatchConfig,
}

impl Config {
    /// Resolve a possibly-relative path against our base directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Path of the region definitions.
    pub fn regions_path(&self) -> PathBuf {
        self.resolve(&self.paths.regions)
    }

    /// Path of the brand mapping table.
    pub fn brand_map_path(&self) -> PathBuf {
        self.resolve(&self.paths.brand_map)
    }

    /// Path of the output table.
    pub fn output_path(&self) -> PathBuf {
        self.resolve(&self.paths.output)
    }

    /// Directory we pick up new images from.
    pub fn input_dir(&self) -> PathBuf {
        self.resolve(&self.paths.input_dir)
    }

    /// Directory processed images are moved to.
    pub fn archive_dir(&self) -> PathBuf {
        self.resolve(&self.paths.archive_dir)
    }
}

/// File and directory locations.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub regions: PathBuf,
    pub brand_map: PathBuf,
    pub output: PathBuf,
    pub input_dir: PathBuf,
    pub archive_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            regions: PathBuf::from("refToPartnum.xml"),
            brand_map: PathBuf::from("brandCode.csv"),
            output: PathBuf::from("ocr_results.csv"),
            input_dir: PathBuf::from("refToPN"),
            archive_dir: PathBuf::from("refToPartnum-OK"),
        }
    }
}

/// OCR service settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    /// Endpoint of the OCR HTTP API.
    pub url: String,

    /// Per-request timeout, in seconds.
    pub timeout_secs: u64,
}

impl OcrConfig {
    /// Our request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:1224/api/ocr".to_owned(),
            timeout_secs: 30,
        }
    }
}

/// Names of the regions that carry each semantic field of a label.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldLayout {
    /// Free-form block listing brand codes followed by part numbers.
    pub brand_part: String,

    /// Column listing only the brand codes.
    pub brand_codes: String,

    /// Main brand code printed on the label.
    pub main_brand_code: String,

    /// Conversion code printed on the label.
    pub convert_code: String,

    /// English product name.
    pub english_name: String,
}

impl FieldLayout {
    /// Every region name that feeds a field.
    pub fn names(&self) -> [&str; 5] {
        [
            self.brand_part.as_str(),
            self.brand_codes.as_str(),
            self.main_brand_code.as_str(),
            self.convert_code.as_str(),
            self.english_name.as_str(),
        ]
    }

    /// Does the named region feed a field?
    pub fn contains(&self, region: &str) -> bool {
        self.names().contains(&region)
    }
}

impl Default for FieldLayout {
    fn default() -> Self {
        Self {
            brand_part: "品牌编码及件号".to_owned(),
            brand_codes: "品牌编码".to_owned(),
            main_brand_code: "主品牌编码".to_owned(),
            convert_code: "转换码".to_owned(),
            english_name: "英文名称".to_owned(),
        }
    }
}

/// Header names in the brand mapping table.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrandMapColumns {
    pub code_column: String,
    pub universal_column: String,
}

impl Default for BrandMapColumns {
    fn default() -> Self {
        Self {
            code_column: "品牌编码".to_owned(),
            universal_column: "通用品牌".to_owned(),
        }
    }
}

/// Directory watch settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// How long to wait after the last change before starting a batch.
    pub debounce_ms: u64,
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 1000 }
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::constants::{CALIB_CHUNK_FRAMES, DEFAULT_GAIN_MODES, GAIN_FACTORS, MODULES_NUM};
use super::error::ConfigError;

/// Structure representing the application configuration. Contains pathing, detector selection
/// and run information.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub raw_path: PathBuf,
    pub out_path: PathBuf,
    pub dark_path: Option<PathBuf>,
    pub modules: Vec<usize>,
    pub pulse_ids: Vec<u64>,
    pub raw: bool,
    pub calibrate: bool,
    #[serde(default = "default_gain_modes")]
    pub gain_modes: usize,
    #[serde(default = "default_gain_factors")]
    pub gain_factors: Vec<f64>,
    #[serde(default = "default_chunk_frames")]
    pub chunk_frames: usize,
    pub first_run_number: i32,
    pub last_run_number: i32,
    pub n_threads: i32,
}

fn default_gain_modes() -> usize {
    DEFAULT_GAIN_MODES
}

fn default_gain_factors() -> Vec<f64> {
    GAIN_FACTORS.to_vec()
}

fn default_chunk_frames() -> usize {
    CALIB_CHUNK_FRAMES
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid, all modules selected
    fn default() -> Self {
        Self {
            raw_path: PathBuf::from("None"),
            out_path: PathBuf::from("None"),
            dark_path: None,
            modules: (0..MODULES_NUM).collect(),
            pulse_ids: vec![],
            raw: true,
            calibrate: false,
            gain_modes: DEFAULT_GAIN_MODES,
            gain_factors: default_gain_factors(),
            chunk_frames: CALIB_CHUNK_FRAMES,
            first_run_number: 0,
            last_run_number: 0,
            n_threads: 1,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;
        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject module ids the detector does not have and calibration settings that cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(m) = self.modules.iter().find(|m| **m >= MODULES_NUM) {
            return Err(ConfigError::BadModule(*m));
        }
        if self.gain_factors.len() < self.gain_modes {
            return Err(ConfigError::MissingGainFactors {
                modes: self.gain_modes,
                found: self.gain_factors.len(),
            });
        }
        if self.chunk_frames == 0 {
            return Err(ConfigError::BadChunkSize);
        }
        Ok(())
    }

    /// Selected modules, sorted and without repeats
    pub fn module_ids(&self) -> Vec<usize> {
        let mut modules = self.modules.clone();
        modules.sort_unstable();
        modules.dedup();
        modules
    }

    /// Check if a specific run exists by evaluating the existance of its raw directory
    pub fn does_run_exist(&self, run_number: i32) -> bool {
        self.raw_path.join(self.get_run_str(run_number)).exists()
    }

    /// Get the Path to the directory holding all files of a run
    pub fn get_run_directory(&self, run_number: i32) -> Result<PathBuf, ConfigError> {
        let run_dir: PathBuf = self.raw_path.join(self.get_run_str(run_number));
        if run_dir.exists() {
            Ok(run_dir)
        } else {
            Err(ConfigError::BadFilePath(run_dir))
        }
    }

    /// Get the path to the output hdf5 file, creating the output directory if needed
    pub fn get_hdf_file_name(&self, run_number: i32) -> Result<PathBuf, ConfigError> {
        let hdf_dir = self.out_path.join("hdf5");
        if !self.out_path.exists() {
            return Err(ConfigError::BadFilePath(self.out_path.clone()));
        }
        std::fs::create_dir_all(&hdf_dir)?;
        Ok(hdf_dir.join(format!("{}.h5", self.get_run_str(run_number))))
    }

    /// Tag stored with the output describing which stream the sources came from
    pub fn stream_tag(&self) -> &'static str {
        if self.raw {
            "raw"
        } else {
            "proc"
        }
    }

    /// Construct the run string using the EuXFEL directory format
    fn get_run_str(&self, run_number: i32) -> String {
        format!("r{run_number:0>4}")
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    pub fn has_pulse_filter(&self) -> bool {
        !self.pulse_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_defaults() {
        let yaml = "raw_path: /data/raw\n\
                    out_path: /data/scratch\n\
                    dark_path: null\n\
                    modules: [3, 1, 3]\n\
                    pulse_ids: [4]\n\
                    raw: false\n\
                    calibrate: false\n\
                    first_run_number: 10\n\
                    last_run_number: 12\n\
                    n_threads: 2\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.gain_modes, DEFAULT_GAIN_MODES);
        assert_eq!(config.gain_factors, GAIN_FACTORS.to_vec());
        assert_eq!(config.chunk_frames, CALIB_CHUNK_FRAMES);
        assert_eq!(config.module_ids(), vec![1, 3]);
        assert_eq!(config.stream_tag(), "proc");
        assert!(config.has_pulse_filter());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_module() {
        let config = Config {
            modules: vec![0, 16],
            ..Default::default()
        };
        match config.validate() {
            Err(ConfigError::BadModule(16)) => (),
            _ => panic!(),
        }
    }

    #[test]
    fn test_run_directory_format() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("r0042")).unwrap();
        let config = Config {
            raw_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(config.does_run_exist(42));
        assert!(!config.does_run_exist(43));
        assert_eq!(
            config.get_run_directory(42).unwrap(),
            dir.path().join("r0042")
        );
    }

    #[test]
    fn test_gain_factor_per_mode() {
        let config = Config {
            gain_modes: 3,
            ..Default::default()
        };
        match config.validate() {
            Err(ConfigError::MissingGainFactors { modes: 3, found: 2 }) => (),
            _ => panic!(),
        }
        let config = Config {
            chunk_frames: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadChunkSize)));
    }
}

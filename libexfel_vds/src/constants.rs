// AGIPD geometry
pub const MODULES_NUM: usize = 16;
pub const MODULE_ROWS: usize = 512;
pub const MODULE_COLS: usize = 128;

// ePix geometry
pub const EPIX_ROWS: usize = 708;
pub const EPIX_COLS: usize = 768;
pub const EPIX_IDS: [u8; 2] = [1, 2];

// Raw file structure
pub const AGIPD_SOURCE: &str = "MID_DET_AGIPD1M-1";
pub const EPIX_TRAIN_KEY: &str = "INDEX/trainId";

/// Train id 0 marks an unfilled slot at the tail of a partially written file
pub const INVALID_TRAIN_ID: u64 = 0;

// Raw agipd data keeps the gain stage on the second axis of the image dataset
pub const RAW_DATA_CHANNEL: usize = 0;
pub const RAW_GAIN_CHANNEL: usize = 1;

// Output file structure
pub const AGIPD_GROUP: &str = "data/AGIPD";
pub const AGIPD_INDEX_GROUP: &str = "data/AGIPD/index";
pub const AGIPD_MODULE_KEY: &str = "moduleId";
pub const AGIPD_TRAIN_KEY: &str = "trainId";
pub const AGIPD_PULSE_KEY: &str = "pulseId";
pub const AGIPD_CELL_KEY: &str = "cellId";
pub const AGIPD_DATA_KEY: &str = "data";
pub const AGIPD_GAIN_KEY: &str = "gain";
pub const AGIPD_CORRECTED_GROUP: &str = "data/AGIPD_corrected";
pub const INDEX_GROUP: &str = "index";

// Dark calibration file structure
pub const OFFSET_KEY: &str = "AnalogOffset";
pub const GAIN_LEVEL_KEY: &str = "DigitalGainLevel";
pub const BADPIXEL_KEY: &str = "Badpixel";
pub const GOOD_PIXEL_KEY: &str = "good";

/// High and medium gain are the two stages a dark run characterises
pub const DEFAULT_GAIN_MODES: usize = 2;
/// Rows at the top of each module used as the flat reference for baseline correction
pub const FLAT_ROI_ROWS: usize = 10;
/// ADU to photon conversion of the high and medium gain stages
pub const GAIN_FACTORS: [f64; 2] = [1.0 / 68.8, 1.0 / 1.376];
/// Frames calibrated per read/write pass
pub const CALIB_CHUNK_FRAMES: usize = 64;

/// Version of the output container layout
pub const FORMAT_VERSION: &str = "1.0";

/// HDF5 dataset path of an AGIPD module's image group
pub fn agipd_image_path(module_id: usize) -> String {
    format!("INSTRUMENT/{AGIPD_SOURCE}/DET/{module_id}CH0:xtdf/image")
}

/// HDF5 dataset path of an ePix detector's pixel data
pub fn epix_data_path(epix_id: u8) -> String {
    format!("INSTRUMENT/MID_EXP_EPIX-{epix_id}/DET/RECEIVER:daqOutput/data/image/pixels")
}

/// Output group of an ePix detector
pub fn epix_group(epix_id: u8) -> String {
    format!("data/EPIX-{epix_id}")
}

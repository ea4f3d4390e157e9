//! # exfel_vds
//!
//! exfel_vds builds the aligned view of a European XFEL MID run, written in Rust. It takes the
//! sequence files written by the 16 modules of the AGIPD detector and by the two ePix
//! detectors, aligns them by train id (and optionally by pulse id), and maps them into a
//! single HDF5 container made of virtual datasets. No pixel data is copied: the container
//! points back at the source files. Optionally, a dark calibration is computed over the
//! aligned AGIPD data and stored next to the raw view.
//!
//! ## Installation
//!
//! The only method of install is from source.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### HDF5
//!
//! HDF5 is built from source and linked statically by the `hdf5` crate, so no system install
//! is needed. Virtual datasets need HDF5 1.10 or newer; the output container is always created
//! with the latest file format.
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./exfel_vds_cli` from the top
//! level repository. Run `exfel_vds_cli --help` for its usage.
//!
//! ## Configuration
//!
//! - raw_path: directory holding the run directories (`r0001`, `r0002`, ...)
//! - out_path: directory under which `hdf5/r####.h5` containers are written
//! - dark_path: HDF5 file with the dark constants `AnalogOffset` and `DigitalGainLevel`,
//!   both shaped `(gain, cell, module, row, col)`, and optionally `Badpixel`, shaped
//!   `(module x row, col)` with non-zero entries marking bad pixels. Only needed when calibrating.
//! - modules: AGIPD modules to include (0 to 15)
//! - pulse_ids: pulses to keep from every train. Empty keeps every frame.
//! - raw: whether the sources are raw (`raw`) or processed (`proc`) files
//! - calibrate: compute the dark calibration
//! - gain_modes: number of gain modes to calibrate (default 2, high and medium)
//! - gain_factors: ADU to photon factor of each gain mode (default `[1/68.8, 1/1.376]`)
//! - chunk_frames: frames calibrated at a time (default 64)
//! - first_run_number, last_run_number: the run range (inclusive)
//! - n_threads: number of worker threads to divide the runs amongst. Must be at least 1.
//!
//! ```yml
//! raw_path: /gpfs/exfel/exp/MID/202201/p002834/raw
//! out_path: /gpfs/exfel/exp/MID/202201/p002834/scratch
//! dark_path: /gpfs/exfel/exp/MID/202201/p002834/usr/dark/r0100.h5
//! modules: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
//! pulse_ids: []
//! raw: true
//! calibrate: false
//! gain_modes: 2
//! gain_factors: [0.014534883720930232, 0.7267441860465116]
//! chunk_frames: 64
//! first_run_number: 1
//! last_run_number: 10
//! n_threads: 2
//! ```
//!
//! ## Output
//!
//! Every run is written to `r####.h5.part` and only renamed to `r####.h5` once the raw view is
//! complete, so a container with the final name is never partial. Once the container is closed,
//! a side file `r####.yml` lists the source files used and their sizes.
//!
//! In `AGIPD_corrected`, `adu` is the raw value minus the dark offset of each gain mode and
//! `mask` marks the gain mode each pixel was recorded in. `data` is `adu` minus the zero level
//! of the module frame, times the gain factor of the mode, where the pixel was in that mode and
//! is not bad; it is 0 elsewhere. `good` is the usable pixel map from the dark file.
//!
//! ### HDF5 Data Format
//!
//! ```text
//! r0001.h5 - date, version
//! data
//! |---- AGIPD
//! |    |---- moduleId(dset)
//! |    |---- index
//! |    |    |---- trainId, pulseId, cellId(dset, frame)
//! |    |    |---- data, gain(virtual dset, frame x module x 512 x 128)
//! |---- EPIX-1, EPIX-2
//! |    |---- data(virtual dset, train x 708 x 768)
//! |---- AGIPD_corrected
//! |    |---- adu, data, mask(dset, gain mode x frame x module x 512 x 128)
//! |    |---- good(dset, module x 512 x 128)
//! index
//! |---- run, stream, trainId(dset)
//! ```
pub mod aligner;
pub mod calib;
pub mod config;
pub mod constants;
pub mod error;
pub mod file_stack;
pub mod hdf_source;
pub mod hdf_writer;
pub mod index_reader;
pub mod layout;
pub mod process;
pub mod pulse;
pub mod source_file;
pub mod worker_status;

#[cfg(test)]
mod test_utils;

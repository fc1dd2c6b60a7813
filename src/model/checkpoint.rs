//! Weight files. `CompactRecorder` appends the `.mpk` extension itself, so
//! paths are given without it.

use burn::prelude::*;
use burn::record::CompactRecorder;
use std::path::Path;

use crate::error::Result;

pub fn save<B: Backend, M: Module<B>>(module: &M, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    module
        .clone()
        .save_file(path.to_path_buf(), &CompactRecorder::new())?;
    log::debug!("saved weights to {}", path.display());
    Ok(())
}

pub fn load<B: Backend, M: Module<B>>(
    module: M,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<M> {
    let module = module.load_file(path.as_ref().to_path_buf(), &CompactRecorder::new(), device)?;
    Ok(module)
}

/// Loads weights into `module`. When that fails and `or_new` is set the
/// freshly initialized module is returned instead of the error.
pub fn load_or_init<B: Backend, M: Module<B>>(
    module: M,
    path: impl AsRef<Path>,
    device: &B::Device,
    or_new: bool,
) -> Result<M> {
    let path = path.as_ref();
    match load(module.clone(), path, device) {
        Ok(loaded) => {
            log::info!("loaded weights from {}", path.display());
            Ok(loaded)
        }
        Err(err) if or_new => {
            log::warn!(
                "load weight fail for {} ({err}), starting from fresh weights",
                path.display()
            );
            Ok(module)
        }
        Err(err) => Err(err),
    }
}

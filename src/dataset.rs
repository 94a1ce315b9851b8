//! Scene directories in the Middlebury layout: `im0.png`/`im1.png` for the
//! left/right views and `disp0.pfm`/`disp1.pfm` for their references.

use std::path::{Path, PathBuf};

use log::info;

use crate::error::{Error, Result};
use crate::io::{read_disparity, read_image};
use crate::pair::StereoPair;
use crate::pfm::DepthRaster;

pub const LEFT_IMAGE: &str = "im0.png";
pub const RIGHT_IMAGE: &str = "im1.png";
pub const LEFT_REFERENCE: &str = "disp0.pfm";
pub const RIGHT_REFERENCE: &str = "disp1.pfm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scene {
    pub name: String,
    pub dir: PathBuf,
}

/// A fully loaded scene; building one fails on the first unreadable file.
#[derive(Debug, Clone)]
pub struct SceneData {
    pub pair: StereoPair,
    pub gt_left: DepthRaster,
    pub gt_right: DepthRaster,
}

fn is_scene(dir: &Path) -> bool {
    dir.join(LEFT_IMAGE).is_file()
}

impl Scene {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        let dir = dir.into();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        Scene { name, dir }
    }

    /// `root` itself when it is a scene, otherwise its scene subdirectories
    /// sorted by name.
    pub fn discover<P: AsRef<Path>>(root: P) -> Result<Vec<Scene>> {
        let root = root.as_ref();
        if is_scene(root) {
            return Ok(vec![Scene::new(root)]);
        }
        let entries = std::fs::read_dir(root).map_err(|e| Error::io(root, e))?;
        let mut dirs = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| Error::io(root, e))?.path();
            if path.is_dir() && is_scene(&path) {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs.into_iter().map(Scene::new).collect())
    }

    pub fn load(&self) -> Result<SceneData> {
        info!("loading scene {}", self.name);
        let left = read_image(self.dir.join(LEFT_IMAGE))?;
        let right = read_image(self.dir.join(RIGHT_IMAGE))?;
        let gt_left = read_disparity(self.dir.join(LEFT_REFERENCE))?;
        let gt_right = read_disparity(self.dir.join(RIGHT_REFERENCE))?;
        Ok(SceneData {
            pair: StereoPair::from_images(&left, &right)?,
            gt_left,
            gt_right,
        })
    }
}

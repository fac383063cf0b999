//! Region definitions: named rectangles to crop out of each label image.
//!
//! Regions are drawn once in an image annotation tool and saved as
//! Pascal-VOC style XML, one `<object>` per field.

use image::DynamicImage;
use quick_xml::de::from_str;

use crate::prelude::*;

/// An axis-aligned rectangle in source-image pixels. `xmin < xmax` and
/// `ymin < ymax` always hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
}

impl Rect {
    /// Create a new rectangle, or `None` if it would be empty.
    pub fn new(xmin: u32, ymin: u32, xmax: u32, ymax: u32) -> Option<Self> {
        if xmin < xmax && ymin < ymax {
            Some(Self {
                xmin,
                ymin,
                xmax,
                ymax,
            })
        } else {
            None
        }
    }

    /// Clip this rectangle to an image of the given size, returning
    /// `(x, y, width, height)`, or `None` if nothing is left.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let xmax = self.xmax.min(width);
        let ymax = self.ymax.min(height);
        if self.xmin >= xmax || self.ymin >= ymax {
            return None;
        }
        Some((self.xmin, self.ymin, xmax - self.xmin, ymax - self.ymin))
    }

    /// Crop this rectangle out of `image`. Parts of the rectangle outside the
    /// image are dropped; `None` means the rectangle missed the image entirely.
    pub fn crop(&self, image: &DynamicImage) -> Option<DynamicImage> {
        let (x, y, w, h) = self.clip_to(image.width(), image.height())?;
        Some(image.crop_imm(x, y, w, h))
    }
}

/// A named region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub name: String,
    pub rect: Rect,
}

/// The full set of regions, in file order.
#[derive(Clone, Debug, Default)]
pub struct RegionConfig {
    regions: Vec<Region>,
}

impl RegionConfig {
    /// Load region definitions from an XML file.
    ///
    /// A missing or unparsable file is an error, as is a file without any
    /// usable regions. Individual malformed `<object>` entries are skipped.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub fn from_path(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read region definitions {:?}", path))?;
        let config = Self::from_xml(&xml)
            .with_context(|| format!("cannot parse region definitions {:?}", path))?;
        info!(count = config.len(), "Loaded region definitions");
        Ok(config)
    }

    /// Parse region definitions from an XML string.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let annotation: Annotation = from_str(xml).context("malformed XML")?;
        let mut config = Self::default();
        for (idx, object) in annotation.objects.into_iter().enumerate() {
            match object.into_region() {
                Ok(region) => config.insert(region),
                Err(err) => warn!("Skipping region entry #{}: {}", idx, err),
            }
        }
        if config.is_empty() {
            return Err(anyhow!("no usable regions defined"));
        }
        Ok(config)
    }

    /// Add a region, replacing any earlier region with the same name.
    fn insert(&mut self, region: Region) {
        if let Some(existing) = self.regions.iter_mut().find(|r| r.name == region.name) {
            warn!("Region {:?} is defined more than once; using the last", region.name);
            existing.rect = region.rect;
        } else {
            self.regions.push(region);
        }
    }

    /// Look up a region by name.
    pub fn get(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Iterate over regions in file order.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Root of a VOC annotation file. Everything except `<object>` is ignored.
#[derive(Debug, Deserialize)]
struct Annotation {
    #[serde(rename = "object", default)]
    objects: Vec<VocObject>,
}

/// A single `<object>`. Every field is optional so that one bad entry does
/// not prevent us from reading the others.
#[derive(Debug, Deserialize)]
struct VocObject {
    name: Option<String>,
    bndbox: Option<VocBox>,
}

#[derive(Debug, Deserialize)]
struct VocBox {
    xmin: Option<String>,
    ymin: Option<String>,
    xmax: Option<String>,
    ymax: Option<String>,
}

impl VocObject {
    fn into_region(self) -> Result<Region> {
        let name = self
            .name
            .map(|n| n.trim().to_owned())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| anyhow!("missing <name>"))?;
        let bndbox = self
            .bndbox
            .ok_or_else(|| anyhow!("region {:?} has no <bndbox>", name))?;
        let bound = |label: &str, value: Option<String>| -> Result<u32> {
            let value = value
                .ok_or_else(|| anyhow!("region {:?} is missing <{}>", name, label))?;
            value.trim().parse::<u32>().with_context(|| {
                format!("region {:?} has invalid <{}> {:?}", name, label, value)
            })
        };
        let xmin = bound("xmin", bndbox.xmin)?;
        let ymin = bound("ymin", bndbox.ymin)?;
        let xmax = bound("xmax", bndbox.xmax)?;
        let ymax = bound("ymax", bndbox.ymax)?;
        let rect = Rect::new(xmin, ymin, xmax, ymax)
            .ok_or_else(|| anyhow!("region {:?} is an empty rectangle", name))?;
        Ok(Region { name, rect })
    }
}

use image::Rgb;
use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufRead},
    path::Path,
};

use crate::config::{LabelsConfig, Validatable};

/// COCO class ids as emitted by SSD-MobileNet graphs (1-based, with gaps).
const COCO_LABELS: [(u32, &str); 80] = [
    (1, "person"),
    (2, "bicycle"),
    (3, "car"),
    (4, "motorcycle"),
    (5, "airplane"),
    (6, "bus"),
    (7, "train"),
    (8, "truck"),
    (9, "boat"),
    (10, "traffic light"),
    (11, "fire hydrant"),
    (13, "stop sign"),
    (14, "parking meter"),
    (15, "bench"),
    (16, "bird"),
    (17, "cat"),
    (18, "dog"),
    (19, "horse"),
    (20, "sheep"),
    (21, "cow"),
    (22, "elephant"),
    (23, "bear"),
    (24, "zebra"),
    (25, "giraffe"),
    (27, "backpack"),
    (28, "umbrella"),
    (31, "handbag"),
    (32, "tie"),
    (33, "suitcase"),
    (34, "frisbee"),
    (35, "skis"),
    (36, "snowboard"),
    (37, "sports ball"),
    (38, "kite"),
    (39, "baseball bat"),
    (40, "baseball glove"),
    (41, "skateboard"),
    (42, "surfboard"),
    (43, "tennis racket"),
    (44, "bottle"),
    (46, "wine glass"),
    (47, "cup"),
    (48, "fork"),
    (49, "knife"),
    (50, "spoon"),
    (51, "bowl"),
    (52, "banana"),
    (53, "apple"),
    (54, "sandwich"),
    (55, "orange"),
    (56, "broccoli"),
    (57, "carrot"),
    (58, "hot dog"),
    (59, "pizza"),
    (60, "donut"),
    (61, "cake"),
    (62, "chair"),
    (63, "couch"),
    (64, "potted plant"),
    (65, "bed"),
    (67, "dining table"),
    (70, "toilet"),
    (72, "tv"),
    (73, "laptop"),
    (74, "mouse"),
    (75, "remote"),
    (76, "keyboard"),
    (77, "cell phone"),
    (78, "microwave"),
    (79, "oven"),
    (80, "toaster"),
    (81, "sink"),
    (82, "refrigerator"),
    (84, "book"),
    (85, "clock"),
    (86, "vase"),
    (87, "scissors"),
    (88, "teddy bear"),
    (89, "hair drier"),
    (90, "toothbrush"),
];

const PALETTE_SIZE: u32 = 90;

#[derive(Debug, Clone)]
pub struct ColorLabel {
    pub label: String,
    pub color: Option<Rgb<u8>>,
}

/// Maps detector class ids to display names and colours.
#[derive(Debug, Clone)]
pub struct LabelTable {
    labels: HashMap<u32, ColorLabel>,
}

impl LabelTable {
    pub fn coco() -> Self {
        let labels = COCO_LABELS
            .iter()
            .map(|(id, label)| {
                (
                    *id,
                    ColorLabel {
                        label: label.to_string(),
                        color: None,
                    },
                )
            })
            .collect();
        Self { labels }
    }

    pub fn from_config(labels_cfg: Option<&LabelsConfig>) -> io::Result<Self> {
        match labels_cfg {
            Some(cfg) => {
                let table = Self {
                    labels: load_labels(&cfg.get_path())?,
                };
                if table.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Labels file {:?} has no entries", cfg.get_path()),
                    ));
                }
                tracing::info!("Loaded {} labels from {:?}", table.len(), cfg.get_path());
                Ok(table)
            }
            None => Ok(Self::coco()),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, class_id: u32) -> String {
        match self.labels.get(&class_id) {
            Some(entry) => entry.label.clone(),
            None => format!("unknown class {}", class_id),
        }
    }

    pub fn color(&self, class_id: u32) -> Rgb<u8> {
        self.labels
            .get(&class_id)
            .and_then(|entry| entry.color)
            .unwrap_or_else(|| {
                let hue = (class_id % PALETTE_SIZE) as f32 / PALETTE_SIZE as f32 * 360.0;
                hsv_to_rgb(hue, 0.8, 0.9)
            })
    }
}

/// Reads `id,label,red,green,blue` lines.
pub fn load_labels(filepath: &Path) -> io::Result<HashMap<u32, ColorLabel>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut color_labels = HashMap::new();

    for line_result in reader.lines() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').collect();

        if parts.len() == 5 {
            let id: u32 = parse_field(parts[0], "class id")?;
            let label = parts[1].trim().to_string();
            let red: u8 = parse_field(parts[2], "red value")?;
            let green: u8 = parse_field(parts[3], "green value")?;
            let blue: u8 = parse_field(parts[4], "blue value")?;

            color_labels.insert(
                id,
                ColorLabel {
                    label,
                    color: Some(Rgb([red, green, blue])),
                },
            );
        } else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid line format: {}", line),
            ));
        }
    }

    Ok(color_labels)
}

fn parse_field<T: std::str::FromStr>(field: &str, what: &str) -> io::Result<T> {
    field
        .trim()
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("Invalid {}", what)))
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    Rgb([
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_labels(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "photo_detect_{}_{}.txt",
            name,
            std::process::id()
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_coco_lookup() {
        let table = LabelTable::coco();
        assert_eq!(table.len(), 80);
        assert_eq!(table.label(1), "person");
        assert_eq!(table.label(17), "cat");
        assert_eq!(table.label(18), "dog");
        assert_eq!(table.label(90), "toothbrush");
        assert_eq!(table.label(12), "unknown class 12");
    }

    #[test]
    fn test_palette_is_stable_per_class() {
        let table = LabelTable::coco();
        assert_eq!(table.color(17), table.color(17));
        assert_ne!(table.color(1), table.color(45));
    }

    #[test]
    fn test_load_labels_file() {
        let path = write_labels("labels_ok", "17, kitty, 255, 0, 0\n\n18,puppy,0,255,0\n");
        let labels = load_labels(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(labels.len(), 2);
        assert_eq!(labels[&17].label, "kitty");
        assert_eq!(labels[&18].color, Some(Rgb([0, 255, 0])));
    }

    #[test]
    fn test_load_labels_rejects_bad_line() {
        let path = write_labels("labels_bad", "17,cat,255,0\n");
        let result = load_labels(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_file_colours_override_palette() {
        let path = write_labels("labels_color", "17,cat,1,2,3\n");
        let table = LabelTable::from_config(Some(&LabelsConfig {
            labels_file: path.file_name().unwrap().to_string_lossy().into_owned(),
            labels_dir: path.parent().unwrap().to_path_buf(),
        }))
        .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(table.color(17), Rgb([1, 2, 3]));
        assert_eq!(table.label(1), "unknown class 1");
    }

    #[test]
    fn test_empty_labels_file_is_rejected() {
        let path = write_labels("labels_empty", "\n\n");
        let result = LabelTable::from_config(Some(&LabelsConfig {
            labels_file: path.file_name().unwrap().to_string_lossy().into_owned(),
            labels_dir: path.parent().unwrap().to_path_buf(),
        }));
        std::fs::remove_file(&path).unwrap();

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }
}

use crate::yunet;
use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array2, Array4};
use ort::{session::Session, value::Value};

const DETECTOR_INPUT: u32 = 640;
const ENCODER_INPUT: u32 = 112;

/// Detection result from YuNet, in source-image pixels
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// Face embedding (SFace output), L2-normalized
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Array2<f32>,
}

impl Embedding {
    pub fn from_vec(values: Vec<f32>) -> Result<Self> {
        let len = values.len();
        Ok(Self {
            vector: Array2::from_shape_vec((1, len), values)?,
        })
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }
}

/// Pack an RGB image into a planar `[1, 3, H, W]` tensor in BGR order, values in [0, 255].
fn bgr_planar_tensor(img: &RgbImage) -> Result<Array4<f32>> {
    let (w, h) = img.dimensions();
    let pixel_count = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * pixel_count];
    let (b_plane, rest) = data.split_at_mut(pixel_count);
    let (g_plane, r_plane) = rest.split_at_mut(pixel_count);

    for (i, px) in img.pixels().enumerate() {
        r_plane[i] = px[0] as f32;
        g_plane[i] = px[1] as f32;
        b_plane[i] = px[2] as f32;
    }

    Ok(Array4::from_shape_vec((1, 3, h as usize, w as usize), data)?)
}

/// Aspect-preserving placement of the source image on the square detector canvas.
struct Letterbox {
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl Letterbox {
    fn fit(img: &DynamicImage, target: u32) -> (Self, RgbImage) {
        let (w, h) = img.dimensions();
        let scale = target as f32 / w.max(h) as f32;
        let new_w = ((w as f32 * scale) as u32).clamp(1, target);
        let new_h = ((h as f32 * scale) as u32).clamp(1, target);
        let resized = img.resize_exact(new_w, new_h, image::imageops::FilterType::Triangle);

        let offset_x = (target - new_w) / 2;
        let offset_y = (target - new_h) / 2;
        let mut canvas = DynamicImage::new_rgb8(target, target);
        image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

        (
            Self {
                scale,
                offset_x: offset_x as f32,
                offset_y: offset_y as f32,
            },
            canvas.to_rgb8(),
        )
    }

    /// Map a normalized canvas coordinate back to source pixels.
    fn x(&self, v: f32) -> f32 {
        (v * DETECTOR_INPUT as f32 - self.offset_x) / self.scale
    }

    fn y(&self, v: f32) -> f32 {
        (v * DETECTOR_INPUT as f32 - self.offset_y) / self.scale
    }

    fn restore(&self, raw: yunet::RawDetection) -> Detection {
        let mut landmarks = [0.0f32; 10];
        for i in 0..5 {
            landmarks[i * 2] = self.x(raw.landmarks[i * 2]);
            landmarks[i * 2 + 1] = self.y(raw.landmarks[i * 2 + 1]);
        }
        Detection {
            bbox: [
                self.x(raw.bbox[0]),
                self.y(raw.bbox[1]),
                raw.bbox[2] * DETECTOR_INPUT as f32 / self.scale,
                raw.bbox[3] * DETECTOR_INPUT as f32 / self.scale,
            ],
            score: raw.score,
            landmarks,
        }
    }
}

/// Detect faces in an image using the YuNet detector.
///
/// Results are in source-image pixels, ordered by descending score when NMS runs.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (letterbox, canvas) = Letterbox::fit(img, DETECTOR_INPUT);
    let input_tensor = Value::from_array(bgr_planar_tensor(&canvas)?)?;

    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut output_data: Vec<(Vec<i64>, Vec<f32>)> = Vec::with_capacity(12);
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        output_data.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let output_refs: Vec<(&[i64], &[f32])> = output_data
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let heads = yunet::parse_yunet_outputs(&output_refs, DETECTOR_INPUT as usize)
        .context("parsing detector outputs")?;
    let raw = yunet::decode_detections(&heads, score_threshold, DETECTOR_INPUT as usize)?;

    let detections: Vec<Detection> = raw.into_iter().map(|d| letterbox.restore(d)).collect();
    log::debug!("detector produced {} candidate(s)", detections.len());

    if nms_threshold < 1.0 {
        Ok(nms(&detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Non-maximum suppression; survivors come back sorted by descending score.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Rotate, scale and crop the face so the eyes land on the ArcFace reference points.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    // reference eye positions for a 112x112 crop
    let ref_left_eye = (38.3_f32, 51.7_f32);
    let ref_right_eye = (73.5_f32, 51.5_f32);

    let left_eye = (detection.landmarks[0], detection.landmarks[1]);
    let right_eye = (detection.landmarks[2], detection.landmarks[3]);

    let eye_dx = right_eye.0 - left_eye.0;
    let eye_dy = right_eye.1 - left_eye.1;
    let actual_eye_dist = eye_dx.hypot(eye_dy);
    if actual_eye_dist <= f32::EPSILON {
        anyhow::bail!("degenerate landmarks: eyes coincide");
    }
    let ref_eye_dist = (ref_right_eye.0 - ref_left_eye.0).hypot(ref_right_eye.1 - ref_left_eye.1);

    let unit = size as f32 / ENCODER_INPUT as f32;
    let scale = unit * ref_eye_dist / actual_eye_dist;
    let angle = eye_dy.atan2(eye_dx);

    let eye_center = (
        (left_eye.0 + right_eye.0) / 2.0,
        (left_eye.1 + right_eye.1) / 2.0,
    );
    let target_center = (
        (ref_left_eye.0 + ref_right_eye.0) / 2.0 * unit,
        (ref_left_eye.1 + ref_right_eye.1) / 2.0 * unit,
    );

    // forward map: out = [a b; c d] * in + [tx ty]
    let a = scale * angle.cos();
    let b = scale * angle.sin();
    let c = -b;
    let d = a;
    let tx = target_center.0 - (a * eye_center.0 + b * eye_center.1);
    let ty = target_center.1 - (c * eye_center.0 + d * eye_center.1);
    let det = a * d - b * c;

    let src = img.to_rgb8();
    let (img_w, img_h) = src.dimensions();
    let mut output = RgbImage::new(size, size);

    for (out_x, out_y, px) in output.enumerate_pixels_mut() {
        let dx = out_x as f32 - tx;
        let dy = out_y as f32 - ty;
        let in_x = (d * dx - b * dy) / det;
        let in_y = (-c * dx + a * dy) / det;

        if in_x < 0.0 || in_y < 0.0 || in_x >= img_w as f32 || in_y >= img_h as f32 {
            continue;
        }

        let x0 = in_x.floor() as u32;
        let y0 = in_y.floor() as u32;
        let x1 = (x0 + 1).min(img_w - 1);
        let y1 = (y0 + 1).min(img_h - 1);
        let fx = in_x - x0 as f32;
        let fy = in_y - y0 as f32;

        let p00 = src.get_pixel(x0, y0);
        let p10 = src.get_pixel(x1, y0);
        let p01 = src.get_pixel(x0, y1);
        let p11 = src.get_pixel(x1, y1);

        let w00 = (1.0 - fx) * (1.0 - fy);
        let w10 = fx * (1.0 - fy);
        let w01 = (1.0 - fx) * fy;
        let w11 = fx * fy;

        for ch in 0..3 {
            px[ch] = (p00[ch] as f32 * w00
                + p10[ch] as f32 * w10
                + p01[ch] as f32 * w01
                + p11[ch] as f32 * w11) as u8;
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode an aligned face crop to an L2-normalized SFace embedding.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let face_rgb = face_img
        .resize_exact(ENCODER_INPUT, ENCODER_INPUT, image::imageops::FilterType::Triangle)
        .to_rgb8();
    let input_tensor = Value::from_array(bgr_planar_tensor(&face_rgb)?)?;

    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // expecting [1, 128]
    let embedding_size = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    let mut values: Vec<f32> = data[..embedding_size].to_vec();

    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|x| *x /= norm);
    }

    Embedding::from_vec(values)
}

/// Euclidean distance between two embeddings; always non-negative.
pub fn euclidean_distance(a: &Embedding, b: &Embedding) -> f32 {
    a.vector
        .iter()
        .zip(b.vector.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

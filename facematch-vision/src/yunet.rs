//! YuNet detector post-processing.
//!
//! YuNet is anchor-free: every grid cell of the three feature maps (strides 8, 16, 32)
//! predicts a score, a box and five landmarks relative to its own position.
//!
//! cx = (grid_x + dx) * stride / input_size
//! cy = (grid_y + dy) * stride / input_size
//! w  = dw * stride / input_size
//! h  = dh * stride / input_size

use anyhow::Result;
use ndarray::Array2;

const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h (normalized [0,1])
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5 (normalized [0,1])
}

/// Per-stride head outputs, indexed in `STRIDES` order.
#[derive(Debug, Clone)]
pub struct YunetHeads {
    pub scores: Vec<Array2<f32>>,
    pub bboxes: Vec<Array2<f32>>,
    pub landmarks: Vec<Array2<f32>>,
}

/// Decode every grid cell whose score reaches `score_threshold`.
pub fn decode_detections(
    heads: &YunetHeads,
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>> {
    let mut detections = Vec::new();
    let norm = input_size as f32;

    for (scale_idx, &stride) in STRIDES.iter().enumerate() {
        let scores = &heads.scores[scale_idx];
        let bboxes = &heads.bboxes[scale_idx];
        let landmarks = &heads.landmarks[scale_idx];

        let feature_size = input_size / stride;
        let cells = scores.shape()[0];
        if cells != feature_size * feature_size {
            anyhow::bail!(
                "stride {} expects a {}x{} grid ({} cells), got {}",
                stride,
                feature_size,
                feature_size,
                feature_size * feature_size,
                cells
            );
        }

        let stride = stride as f32;
        for row in 0..feature_size {
            for col in 0..feature_size {
                let idx = row * feature_size + col;
                let score = scores[[idx, 0]];
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + bboxes[[idx, 0]]) * stride / norm;
                let cy = (row as f32 + bboxes[[idx, 1]]) * stride / norm;
                let w = bboxes[[idx, 2]] * stride / norm;
                let h = bboxes[[idx, 3]] * stride / norm;

                let mut lms = [0.0f32; 10];
                for k in 0..5 {
                    lms[k * 2] = (col as f32 + landmarks[[idx, k * 2]]) * stride / norm;
                    lms[k * 2 + 1] = (row as f32 + landmarks[[idx, k * 2 + 1]]) * stride / norm;
                }

                detections.push(RawDetection {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                    landmarks: lms,
                });
            }
        }
    }

    Ok(detections)
}

/// Collect one output group (three strides) starting at `offset`, checking each
/// tensor is `[1, cells, width]`.
fn take_group(
    outputs: &[(&[i64], &[f32])],
    offset: usize,
    width: usize,
    name: &str,
    input_size: usize,
) -> Result<Vec<Array2<f32>>> {
    STRIDES
        .iter()
        .enumerate()
        .map(|(i, &stride)| {
            let idx = offset + i;
            let cells = (input_size / stride) * (input_size / stride);
            let (shape, data) = outputs
                .get(idx)
                .ok_or_else(|| anyhow::anyhow!("missing {} output at index {}", name, idx))?;
            if shape.len() != 3
                || shape[0] != 1
                || shape[1] as usize != cells
                || shape[2] as usize != width
            {
                anyhow::bail!(
                    "unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
                    name,
                    idx,
                    shape,
                    cells,
                    width
                );
            }
            Ok(Array2::from_shape_vec((cells, width), data.to_vec())?)
        })
        .collect()
}

/// Split the 12 raw YuNet tensors into per-stride heads.
///
/// Output order: cls_8, cls_16, cls_32, obj_8, obj_16, obj_32,
/// bbox_8, bbox_16, bbox_32, kps_8, kps_16, kps_32.
/// Scores are `sigmoid(cls * obj)`.
pub fn parse_yunet_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<YunetHeads> {
    let cls = take_group(outputs, 0, 1, "cls", input_size)?;
    let obj = take_group(outputs, 3, 1, "obj", input_size)?;
    let bboxes = take_group(outputs, 6, 4, "bbox", input_size)?;
    let landmarks = take_group(outputs, 9, 10, "kps", input_size)?;

    let mut scores: Vec<Array2<f32>> = cls.iter().zip(&obj).map(|(c, o)| c * o).collect();
    apply_sigmoid_to_scores(&mut scores);

    Ok(YunetHeads {
        scores,
        bboxes,
        landmarks,
    })
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn apply_sigmoid_to_scores(scores: &mut [Array2<f32>]) {
    for score_map in scores {
        score_map.mapv_inplace(sigmoid);
    }
}

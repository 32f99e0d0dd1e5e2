//! Tensor primitives for the attention head
//!
//! All tensors use the `[batch, channels, time, height, width]` layout.
//! Every output element is accumulated in a fixed order, so results are
//! identical across runs and thread counts.

use crate::error::{Result, ScoreError};
use ndarray::{s, Array2, Array3, Array5, ArrayView1, ArrayView2, ArrayView5, Axis};
use rayon::prelude::*;

/// Stride and zero padding of a 3D convolution, as (time, height, width)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv3dGeometry {
    pub stride: [usize; 3],
    pub padding: [usize; 3],
}

impl Conv3dGeometry {
    /// Unit stride, no padding (pointwise convolutions)
    pub const POINTWISE: Self = Self {
        stride: [1, 1, 1],
        padding: [0, 0, 0],
    };

    pub fn new(stride: [usize; 3], padding: [usize; 3]) -> Self {
        Self { stride, padding }
    }

    /// Output extent along one axis, None if the kernel does not fit
    fn output_len(&self, axis: usize, input: usize, kernel: usize) -> Option<usize> {
        let padded = input + 2 * self.padding[axis];
        if padded < kernel || self.stride[axis] == 0 {
            return None;
        }
        Some((padded - kernel) / self.stride[axis] + 1)
    }
}

/// 3D convolution with bias.
///
/// * `input`  - `[B, C_in, T, H, W]`
/// * `weight` - `[C_out, C_in, kT, kH, kW]`
/// * `bias`   - `[C_out]`
///
/// Output channels are computed in parallel; each element sums over
/// `(c_in, kt, kh, kw)` in that order.
pub fn conv3d(
    input: ArrayView5<f32>,
    weight: ArrayView5<f32>,
    bias: ArrayView1<f32>,
    geometry: Conv3dGeometry,
) -> Result<Array5<f32>> {
    let (batch, in_channels, t, h, w) = input.dim();
    let (out_channels, w_in, kt, kh, kw) = weight.dim();

    if w_in != in_channels {
        return Err(ScoreError::shape_mismatch(
            "conv3d input channels",
            &[w_in],
            &[in_channels],
        ));
    }
    if bias.len() != out_channels {
        return Err(ScoreError::shape_mismatch(
            "conv3d bias",
            &[out_channels],
            &[bias.len()],
        ));
    }

    let (ot, oh, ow) = match (
        geometry.output_len(0, t, kt),
        geometry.output_len(1, h, kh),
        geometry.output_len(2, w, kw),
    ) {
        (Some(ot), Some(oh), Some(ow)) => (ot, oh, ow),
        _ => {
            return Err(ScoreError::shape_mismatch(
                "conv3d spatial extent (padded input smaller than kernel)",
                &[kt, kh, kw],
                &[t, h, w],
            ))
        }
    };

    let [st, sh, sw] = geometry.stride;
    let [pt, ph, pw] = geometry.padding;

    let mut output = Array5::<f32>::zeros((batch, out_channels, ot, oh, ow));

    for b in 0..batch {
        let x = input.index_axis(Axis(0), b);

        let planes: Vec<Array3<f32>> = (0..out_channels)
            .into_par_iter()
            .map(|oc| {
                let kernel = weight.index_axis(Axis(0), oc);
                let mut plane = Array3::<f32>::zeros((ot, oh, ow));

                for ((to, yo, xo), value) in plane.indexed_iter_mut() {
                    let mut acc = bias[oc];
                    for ic in 0..in_channels {
                        for dt in 0..kt {
                            let ti = (to * st + dt) as isize - pt as isize;
                            if ti < 0 || ti >= t as isize {
                                continue;
                            }
                            for dy in 0..kh {
                                let yi = (yo * sh + dy) as isize - ph as isize;
                                if yi < 0 || yi >= h as isize {
                                    continue;
                                }
                                for dx in 0..kw {
                                    let xi = (xo * sw + dx) as isize - pw as isize;
                                    if xi < 0 || xi >= w as isize {
                                        continue;
                                    }
                                    acc += x[[ic, ti as usize, yi as usize, xi as usize]]
                                        * kernel[[ic, dt, dy, dx]];
                                }
                            }
                        }
                    }
                    *value = acc;
                }

                plane
            })
            .collect();

        for (oc, plane) in planes.into_iter().enumerate() {
            output.slice_mut(s![b, oc, .., .., ..]).assign(&plane);
        }
    }

    Ok(output)
}

/// Adaptive average pool to 1x1x1: `[B, C, T, H, W]` -> `[B, C]`
pub fn global_avg_pool3d(input: ArrayView5<f32>) -> Array2<f32> {
    let (batch, channels, t, h, w) = input.dim();
    let count = (t * h * w).max(1) as f32;

    let mut pooled = Array2::<f32>::zeros((batch, channels));
    for ((b, c), value) in pooled.indexed_iter_mut() {
        *value = input.slice(s![b, c, .., .., ..]).sum() / count;
    }
    pooled
}

/// Fully connected layer: `[B, C] x [O, C]^T + [O]` -> `[B, O]`
pub fn linear(
    input: ArrayView2<f32>,
    weight: ArrayView2<f32>,
    bias: ArrayView1<f32>,
) -> Result<Array2<f32>> {
    if input.ncols() != weight.ncols() {
        return Err(ScoreError::shape_mismatch(
            "linear input features",
            &[weight.ncols()],
            &[input.ncols()],
        ));
    }
    if bias.len() != weight.nrows() {
        return Err(ScoreError::shape_mismatch(
            "linear bias",
            &[weight.nrows()],
            &[bias.len()],
        ));
    }

    Ok(input.dot(&weight.t()) + &bias)
}

pub fn relu_inplace(tensor: &mut Array5<f32>) {
    tensor.mapv_inplace(|v| v.max(0.0));
}

/// Logistic function, saturating to exactly 0.0 / 1.0 for large |x|
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Numerically stable softmax over a slice
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array5};

    #[test]
    fn test_pointwise_conv_is_channel_mix() {
        // 2 input channels -> 1 output channel: out = 2*a - b + 0.5
        let input = Array5::from_shape_fn((1, 2, 1, 2, 2), |(_, c, _, y, x)| {
            (c * 10 + y * 2 + x) as f32
        });
        let weight = Array5::from_shape_vec((1, 2, 1, 1, 1), vec![2.0, -1.0]).unwrap();
        let bias = Array1::from_vec(vec![0.5]);

        let out = conv3d(input.view(), weight.view(), bias.view(), Conv3dGeometry::POINTWISE)
            .unwrap();

        assert_eq!(out.dim(), (1, 1, 1, 2, 2));
        for y in 0..2 {
            for x in 0..2 {
                let a = input[[0, 0, 0, y, x]];
                let b = input[[0, 1, 0, y, x]];
                assert_abs_diff_eq!(out[[0, 0, 0, y, x]], 2.0 * a - b + 0.5, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_strided_padded_conv_output_shape() {
        let input = Array5::<f32>::ones((2, 3, 4, 7, 7));
        let weight = Array5::<f32>::ones((5, 3, 3, 3, 3));
        let bias = Array1::<f32>::zeros(5);
        let geometry = Conv3dGeometry::new([1, 2, 2], [1, 1, 1]);

        let out = conv3d(input.view(), weight.view(), bias.view(), geometry).unwrap();
        assert_eq!(out.dim(), (2, 5, 4, 4, 4));

        // Interior element sees the full 3x3x3 window over 3 channels
        assert_abs_diff_eq!(out[[0, 0, 1, 1, 1]], 81.0, epsilon = 1e-5);
        // Corner sees 2x2x2 valid taps
        assert_abs_diff_eq!(out[[0, 0, 0, 0, 0]], 24.0, epsilon = 1e-5);
    }

    #[test]
    fn test_conv_rejects_channel_mismatch() {
        let input = Array5::<f32>::ones((1, 4, 2, 2, 2));
        let weight = Array5::<f32>::ones((1, 3, 1, 1, 1));
        let bias = Array1::<f32>::zeros(1);

        let err = conv3d(input.view(), weight.view(), bias.view(), Conv3dGeometry::POINTWISE)
            .unwrap_err();
        assert!(matches!(err, ScoreError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_conv_rejects_kernel_larger_than_input() {
        let input = Array5::<f32>::ones((1, 1, 2, 4, 4));
        let weight = Array5::<f32>::ones((1, 1, 3, 3, 3));
        let bias = Array1::<f32>::zeros(1);
        let geometry = Conv3dGeometry::new([1, 2, 2], [0, 1, 1]);

        assert!(conv3d(input.view(), weight.view(), bias.view(), geometry).is_err());
    }

    #[test]
    fn test_global_avg_pool() {
        let input = Array5::from_shape_fn((1, 2, 2, 2, 2), |(_, c, t, _, _)| {
            (c * 4 + t) as f32
        });
        let pooled = global_avg_pool3d(input.view());
        assert_abs_diff_eq!(pooled[[0, 0]], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(pooled[[0, 1]], 4.5, epsilon = 1e-6);
    }

    #[test]
    fn test_sigmoid_saturates_without_nan() {
        assert_eq!(sigmoid(200.0), 1.0);
        assert_eq!(sigmoid(-200.0), 0.0);
        assert_eq!(sigmoid(f32::INFINITY), 1.0);
        assert_eq!(sigmoid(f32::NEG_INFINITY), 0.0);
        assert_abs_diff_eq!(sigmoid(0.0), 0.5, epsilon = 1e-7);

        let near = sigmoid(15.0);
        assert!(near > 0.999_999 && near <= 1.0);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1000.0, 999.0]);
        assert_abs_diff_eq!(probs[0] + probs[1], 1.0, epsilon = 1e-6);
        assert!(probs[0] > probs[1]);
        assert!(softmax(&[]).is_empty());
    }
}

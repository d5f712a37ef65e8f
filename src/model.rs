use std::fs::File;
use std::path::Path;

use ndarray::{s, Array1, Array2, ArrayD, ArrayViewD, ArrayViewMutD, Axis, Ix1, Ix2};
use ndarray_npy::{NpzReader, NpzWriter};
use rand::distributions::Uniform;
use rand::{Rng, RngCore};

use crate::config::TrainingConfig;
use crate::error::{Error, Result};
use crate::features::FEATURE_SIZE;

pub const NUM_CLASSES: usize = 2;

/// Dropout is applied only in `Mode::Train`, using the given rng for masks.
pub enum Mode<'a> {
    Train(&'a mut dyn RngCore),
    Eval,
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

fn uniform<R: Rng + ?Sized>(shape: (usize, usize), bound: f32, rng: &mut R) -> Array2<f32> {
    let dist = Uniform::new_inclusive(-bound, bound);
    Array2::from_shape_fn(shape, |_| rng.sample(dist))
}

/// One LSTM layer, PyTorch gate order i, f, g, o.
#[derive(Debug, Clone, PartialEq)]
pub struct LstmWeights {
    /// [4 * hidden, input]
    pub weight_ih: Array2<f32>,
    /// [4 * hidden, hidden]
    pub weight_hh: Array2<f32>,
    pub bias_ih: Array1<f32>,
    pub bias_hh: Array1<f32>,
}

impl LstmWeights {
    pub fn new<R: Rng + ?Sized>(input: usize, hidden: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (hidden as f32).sqrt();
        Self {
            weight_ih: uniform((4 * hidden, input), bound, rng),
            weight_hh: uniform((4 * hidden, hidden), bound, rng),
            bias_ih: uniform((1, 4 * hidden), bound, rng).remove_axis(Axis(0)),
            bias_hh: uniform((1, 4 * hidden), bound, rng).remove_axis(Axis(0)),
        }
    }

    fn zeros_like(&self) -> Self {
        Self {
            weight_ih: Array2::zeros(self.weight_ih.raw_dim()),
            weight_hh: Array2::zeros(self.weight_hh.raw_dim()),
            bias_ih: Array1::zeros(self.bias_ih.raw_dim()),
            bias_hh: Array1::zeros(self.bias_hh.raw_dim()),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.weight_hh.ncols()
    }

    /// A single time step from state `(h0, c0)`.
    fn step(&self, x: &Array2<f32>, h0: Array2<f32>, c0: Array2<f32>) -> LstmStep {
        let hidden = self.hidden_size();
        let gates = x.dot(&self.weight_ih.t()) + h0.dot(&self.weight_hh.t()) + &self.bias_ih
            + &self.bias_hh;

        let i = gates.slice(s![.., 0..hidden]).mapv(sigmoid);
        let f = gates.slice(s![.., hidden..2 * hidden]).mapv(sigmoid);
        let g = gates.slice(s![.., 2 * hidden..3 * hidden]).mapv(f32::tanh);
        let o = gates.slice(s![.., 3 * hidden..]).mapv(sigmoid);
        let c = &f * &c0 + &i * &g;
        let h = &o * &c.mapv(f32::tanh);

        LstmStep {
            x: x.clone(),
            h0,
            c0,
            i,
            f,
            g,
            o,
            c,
            h,
        }
    }

    /// Gradients of one step given dL/dh; returns the weight gradients and dL/dx.
    fn backward(&self, step: &LstmStep, dh: &Array2<f32>) -> (LstmWeights, Array2<f32>) {
        let hidden = self.hidden_size();
        let tc = step.c.mapv(f32::tanh);

        let d_o = dh * &tc;
        let dc = dh * &step.o * &tc.mapv(|t| 1.0 - t * t);
        let d_i = &dc * &step.g;
        let d_f = &dc * &step.c0;
        let d_g = &dc * &step.i;

        let mut d_gates = Array2::<f32>::zeros((dh.nrows(), 4 * hidden));
        d_gates
            .slice_mut(s![.., 0..hidden])
            .assign(&(d_i * step.i.mapv(|v| v * (1.0 - v))));
        d_gates
            .slice_mut(s![.., hidden..2 * hidden])
            .assign(&(d_f * step.f.mapv(|v| v * (1.0 - v))));
        d_gates
            .slice_mut(s![.., 2 * hidden..3 * hidden])
            .assign(&(d_g * step.g.mapv(|v| 1.0 - v * v)));
        d_gates
            .slice_mut(s![.., 3 * hidden..])
            .assign(&(d_o * step.o.mapv(|v| v * (1.0 - v))));

        let bias = d_gates.sum_axis(Axis(0));
        let grads = LstmWeights {
            weight_ih: d_gates.t().dot(&step.x),
            weight_hh: d_gates.t().dot(&step.h0),
            bias_ih: bias.clone(),
            bias_hh: bias,
        };
        let dx = d_gates.dot(&self.weight_ih);
        (grads, dx)
    }
}

struct LstmStep {
    x: Array2<f32>,
    h0: Array2<f32>,
    c0: Array2<f32>,
    i: Array2<f32>,
    f: Array2<f32>,
    g: Array2<f32>,
    o: Array2<f32>,
    c: Array2<f32>,
    h: Array2<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    /// [out, in]
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Linear {
    pub fn new<R: Rng + ?Sized>(input: usize, output: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (input as f32).sqrt();
        Self {
            weight: uniform((output, input), bound, rng),
            bias: uniform((1, output), bound, rng).remove_axis(Axis(0)),
        }
    }

    fn zeros_like(&self) -> Self {
        Self {
            weight: Array2::zeros(self.weight.raw_dim()),
            bias: Array1::zeros(self.bias.raw_dim()),
        }
    }

    fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.weight.t()) + &self.bias
    }

    /// Returns the parameter gradients and dL/dx.
    fn backward(&self, x: &Array2<f32>, dy: &Array2<f32>) -> (Linear, Array2<f32>) {
        let grads = Linear {
            weight: dy.t().dot(x),
            bias: dy.sum_axis(Axis(0)),
        };
        (grads, dy.dot(&self.weight))
    }
}

/// Every trainable tensor of the classifier. Also used to hold gradients.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub lstm: Vec<LstmWeights>,
    pub hidden_layer: Linear,
    pub output_layer: Linear,
}

impl Parameters {
    pub fn zeros_like(&self) -> Self {
        Self {
            lstm: self.lstm.iter().map(LstmWeights::zeros_like).collect(),
            hidden_layer: self.hidden_layer.zeros_like(),
            output_layer: self.output_layer.zeros_like(),
        }
    }

    /// Named views in a fixed order, shared by the optimizer and the checkpoint.
    pub fn tensors(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        let mut out = Vec::new();
        for (l, layer) in self.lstm.iter().enumerate() {
            out.push((format!("lstm.weight_ih_l{l}"), layer.weight_ih.view().into_dyn()));
            out.push((format!("lstm.weight_hh_l{l}"), layer.weight_hh.view().into_dyn()));
            out.push((format!("lstm.bias_ih_l{l}"), layer.bias_ih.view().into_dyn()));
            out.push((format!("lstm.bias_hh_l{l}"), layer.bias_hh.view().into_dyn()));
        }
        out.push(("hidden_layer.weight".into(), self.hidden_layer.weight.view().into_dyn()));
        out.push(("hidden_layer.bias".into(), self.hidden_layer.bias.view().into_dyn()));
        out.push(("output_layer.weight".into(), self.output_layer.weight.view().into_dyn()));
        out.push(("output_layer.bias".into(), self.output_layer.bias.view().into_dyn()));
        out
    }

    pub fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut out = Vec::new();
        for layer in self.lstm.iter_mut() {
            out.push(layer.weight_ih.view_mut().into_dyn());
            out.push(layer.weight_hh.view_mut().into_dyn());
            out.push(layer.bias_ih.view_mut().into_dyn());
            out.push(layer.bias_hh.view_mut().into_dyn());
        }
        out.push(self.hidden_layer.weight.view_mut().into_dyn());
        out.push(self.hidden_layer.bias.view_mut().into_dyn());
        out.push(self.output_layer.weight.view_mut().into_dyn());
        out.push(self.output_layer.bias.view_mut().into_dyn());
        out
    }
}

/// Intermediate activations kept for the backward pass.
pub struct Forward {
    pub probabilities: Array2<f32>,
    steps: Vec<LstmStep>,
    masks: Vec<Option<Array2<f32>>>,
    top: Array2<f32>,
    hidden_pre: Array2<f32>,
    hidden_act: Array2<f32>,
}

/// Stacked LSTM over a one-step sequence, followed by a ReLU dense head and softmax.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceClassifier {
    params: Parameters,
    dropout: f32,
}

impl SequenceClassifier {
    pub fn new<R: Rng + ?Sized>(
        input: usize,
        hidden: usize,
        num_layers: usize,
        head: usize,
        dropout: f32,
        rng: &mut R,
    ) -> Self {
        assert!(num_layers > 0, "At least one recurrent layer is required");
        let lstm = (0..num_layers)
            .map(|l| LstmWeights::new(if l == 0 { input } else { hidden }, hidden, rng))
            .collect();
        Self {
            params: Parameters {
                lstm,
                hidden_layer: Linear::new(hidden, head, rng),
                output_layer: Linear::new(head, NUM_CLASSES, rng),
            },
            dropout,
        }
    }

    /// The 40 → 2×128 LSTM → 64 → 2 network described by `config`.
    pub fn from_config<R: Rng + ?Sized>(config: &TrainingConfig, rng: &mut R) -> Self {
        Self::new(
            FEATURE_SIZE,
            config.hidden_size,
            config.num_layers,
            config.head_size,
            config.dropout,
            rng,
        )
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    pub fn input_size(&self) -> usize {
        self.params.lstm[0].weight_ih.ncols()
    }

    /// Forward pass over `[batch, features]` inputs.
    pub fn forward_t(&self, inputs: &Array2<f32>, mode: Mode<'_>) -> Forward {
        let mut rng = match mode {
            Mode::Train(rng) if self.dropout > 0.0 => Some(rng),
            _ => None,
        };
        let batch = inputs.nrows();
        let layers = self.params.lstm.len();

        let mut steps = Vec::with_capacity(layers);
        let mut masks = Vec::with_capacity(layers);
        let mut x = inputs.clone();
        for (l, layer) in self.params.lstm.iter().enumerate() {
            let hidden = layer.hidden_size();
            let step = layer.step(
                &x,
                Array2::zeros((batch, hidden)),
                Array2::zeros((batch, hidden)),
            );
            x = step.h.clone();
            let mask = match rng.as_deref_mut() {
                Some(rng) if l + 1 < layers => {
                    let keep = 1.0 - self.dropout;
                    let mask = Array2::from_shape_fn(x.raw_dim(), |_| {
                        if rng.gen::<f32>() < keep {
                            1.0 / keep
                        } else {
                            0.0
                        }
                    });
                    x = &x * &mask;
                    Some(mask)
                }
                _ => None,
            };
            steps.push(step);
            masks.push(mask);
        }

        let hidden_pre = self.params.hidden_layer.forward(&x);
        let hidden_act = hidden_pre.mapv(|v| if v < 0.0 { 0.0 } else { v });
        let logits = self.params.output_layer.forward(&hidden_act);

        Forward {
            probabilities: softmax(&logits),
            steps,
            masks,
            top: x,
            hidden_pre,
            hidden_act,
        }
    }

    /// Class probabilities in evaluation mode.
    pub fn probabilities(&self, inputs: &Array2<f32>) -> Array2<f32> {
        self.forward_t(inputs, Mode::Eval).probabilities
    }

    /// Arg-max class per row, evaluation mode.
    pub fn predict(&self, inputs: &Array2<f32>) -> Vec<usize> {
        argmax_rows(&self.probabilities(inputs))
    }

    /// Mean cross-entropy of `forward` against `labels` and the gradient of
    /// every parameter.
    pub fn backward(&self, forward: &Forward, labels: &[usize]) -> (f32, Parameters) {
        let probs = &forward.probabilities;
        let batch = probs.nrows();
        let loss = cross_entropy(probs, labels);

        // The loss log-softmaxes the probabilities again, so the gradient
        // passes through two softmax Jacobians.
        let mut d_probs = softmax(probs);
        for (mut row, &label) in d_probs.outer_iter_mut().zip(labels) {
            row[label] -= 1.0;
        }
        d_probs /= batch as f32;
        let mut d_logits = probs * &d_probs;
        for (mut row, p) in d_logits.outer_iter_mut().zip(probs.outer_iter()) {
            let dot = row.sum();
            row.zip_mut_with(&p, |d, &p| *d -= p * dot);
        }

        let (output_layer, d_act) = self
            .params
            .output_layer
            .backward(&forward.hidden_act, &d_logits);
        let d_pre = d_act * forward.hidden_pre.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        let (hidden_layer, mut dh) = self.params.hidden_layer.backward(&forward.top, &d_pre);

        let layers = self.params.lstm.len();
        let mut lstm = Vec::with_capacity(layers);
        for l in (0..layers).rev() {
            if let Some(mask) = &forward.masks[l] {
                dh = dh * mask;
            }
            let (grads, dx) = self.params.lstm[l].backward(&forward.steps[l], &dh);
            lstm.push(grads);
            dh = dx;
        }
        lstm.reverse();

        (
            loss,
            Parameters {
                lstm,
                hidden_layer,
                output_layer,
            },
        )
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut npz = NpzWriter::new(file);
        npz.add_array(
            "num_layers",
            &ndarray::arr1(&[self.params.lstm.len() as i64]),
        )?;
        npz.add_array("dropout", &ndarray::arr1(&[self.dropout]))?;
        for (name, tensor) in self.params.tensors() {
            npz.add_array(name, &tensor)?;
        }
        npz.finish()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut npz = NpzReader::new(file)?;

        let num_layers: Array1<i64> = npz.by_name("num_layers")?;
        let dropout: Array1<f32> = npz.by_name("dropout")?;
        let num_layers = match num_layers.first() {
            Some(&n) if n > 0 => n as usize,
            _ => return Err(Error::Checkpoint("num_layers must be positive".into())),
        };
        let dropout = dropout.first().copied().unwrap_or(0.0);

        let mut lstm = Vec::new();
        for l in 0..num_layers {
            lstm.push(LstmWeights {
                weight_ih: read::<Ix2>(&mut npz, &format!("lstm.weight_ih_l{l}"))?,
                weight_hh: read::<Ix2>(&mut npz, &format!("lstm.weight_hh_l{l}"))?,
                bias_ih: read::<Ix1>(&mut npz, &format!("lstm.bias_ih_l{l}"))?,
                bias_hh: read::<Ix1>(&mut npz, &format!("lstm.bias_hh_l{l}"))?,
            });
        }
        let params = Parameters {
            lstm,
            hidden_layer: Linear {
                weight: read::<Ix2>(&mut npz, "hidden_layer.weight")?,
                bias: read::<Ix1>(&mut npz, "hidden_layer.bias")?,
            },
            output_layer: Linear {
                weight: read::<Ix2>(&mut npz, "output_layer.weight")?,
                bias: read::<Ix1>(&mut npz, "output_layer.bias")?,
            },
        };
        validate(&params)?;

        Ok(Self { params, dropout })
    }
}

fn read<D: ndarray::Dimension>(
    npz: &mut NpzReader<File>,
    name: &str,
) -> Result<ndarray::Array<f32, D>> {
    let array: ArrayD<f32> = npz.by_name(name)?;
    Ok(array.into_dimensionality::<D>()?)
}

fn validate(params: &Parameters) -> Result<()> {
    let mut input = params.lstm[0].weight_ih.ncols();
    for (l, layer) in params.lstm.iter().enumerate() {
        let hidden = layer.hidden_size();
        let consistent = layer.weight_ih.dim() == (4 * hidden, input)
            && layer.weight_hh.dim() == (4 * hidden, hidden)
            && layer.bias_ih.len() == 4 * hidden
            && layer.bias_hh.len() == 4 * hidden;
        if !consistent {
            return Err(Error::Checkpoint(format!("inconsistent shapes in LSTM layer {l}")));
        }
        input = hidden;
    }
    let head = &params.hidden_layer;
    let out = &params.output_layer;
    if head.weight.ncols() != input
        || head.bias.len() != head.weight.nrows()
        || out.weight.dim() != (NUM_CLASSES, head.weight.nrows())
        || out.bias.len() != NUM_CLASSES
    {
        return Err(Error::Checkpoint("inconsistent shapes in dense head".into()));
    }
    Ok(())
}

/// Row-wise softmax.
pub fn softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.outer_iter_mut() {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    out
}

/// Row-wise log-softmax.
pub fn log_softmax(scores: &Array2<f32>) -> Array2<f32> {
    let mut out = scores.clone();
    for mut row in out.outer_iter_mut() {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let log_sum = max + row.mapv(|v| (v - max).exp()).sum().ln();
        row -= log_sum;
    }
    out
}

/// Cross-entropy of the network output treated as scores: the probabilities
/// are log-softmaxed once more before taking the mean negative
/// log-likelihood of the true classes. NaN propagates.
pub fn cross_entropy(probabilities: &Array2<f32>, labels: &[usize]) -> f32 {
    let total: f32 = log_softmax(probabilities)
        .outer_iter()
        .zip(labels)
        .map(|(row, &label)| -row[label])
        .sum();
    total / labels.len().max(1) as f32
}

pub fn argmax_rows(probabilities: &Array2<f32>) -> Vec<usize> {
    probabilities
        .outer_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
                    if v > best.1 {
                        (i, v)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect()
}

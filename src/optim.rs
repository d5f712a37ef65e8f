use ndarray::{ArrayD, Zip};

use crate::model::Parameters;

/// Adam with bias correction, PyTorch defaults for betas and epsilon.
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    step: i32,
    m: Vec<ArrayD<f32>>,
    v: Vec<ArrayD<f32>>,
}

impl Adam {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Apply one update. `grads` must have the layout of `params`.
    pub fn step(&mut self, params: &mut Parameters, grads: &Parameters) {
        let grads = grads.tensors();
        if self.m.is_empty() {
            self.m = grads.iter().map(|(_, g)| ArrayD::zeros(g.raw_dim())).collect();
            self.v = self.m.clone();
        }
        self.step += 1;

        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.eps);
        let bias1 = 1.0 - beta1.powi(self.step);
        let bias2 = 1.0 - beta2.powi(self.step);
        let lr = self.learning_rate;

        for (((p, (_, g)), m), v) in params
            .tensors_mut()
            .into_iter()
            .zip(grads)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            Zip::from(p)
                .and(&g)
                .and(m)
                .and(v)
                .for_each(|p, &g, m, v| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    let m_hat = *m / bias1;
                    let v_hat = *v / bias2;
                    *p -= lr * m_hat / (v_hat.sqrt() + eps);
                });
        }
    }
}

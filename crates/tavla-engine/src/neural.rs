//! Sigmoid feed-forward networks with one hidden layer, plus the
//! incremental "from base" evaluation path used during move scoring, where
//! successive inputs differ in only a few entries.

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + x.exp())
}

/// A fully-connected single-hidden-layer network. Hidden weights are stored
/// input-major (`[input][hidden]`), output weights output-major
/// (`[output][hidden]`).
#[derive(Debug, Clone, PartialEq)]
pub struct NeuralNet {
    pub c_input: usize,
    pub c_hidden: usize,
    pub c_output: usize,
    /// Training game counter carried through the weight files.
    pub n_trained: i32,
    pub beta_hidden: f32,
    pub beta_output: f32,
    pub hidden_weight: Vec<f32>,
    pub output_weight: Vec<f32>,
    pub hidden_threshold: Vec<f32>,
    pub output_threshold: Vec<f32>,
}

impl NeuralNet {
    pub fn zeroed(c_input: usize, c_hidden: usize, c_output: usize) -> Self {
        Self {
            c_input,
            c_hidden,
            c_output,
            n_trained: 0,
            beta_hidden: 0.1,
            beta_output: 1.0,
            hidden_weight: vec![0.0; c_input * c_hidden],
            output_weight: vec![0.0; c_output * c_hidden],
            hidden_threshold: vec![0.0; c_hidden],
            output_threshold: vec![0.0; c_output],
        }
    }

    /// Plain evaluation. `hidden` is caller-provided scratch of `c_hidden`
    /// floats; on return it holds the post-activation hidden values.
    pub fn evaluate(&self, input: &[f32], hidden: &mut [f32], output: &mut [f32]) {
        self.forward(input, hidden, output, None);
    }

    fn forward(
        &self,
        input: &[f32],
        hidden: &mut [f32],
        output: &mut [f32],
        mut save_base: Option<&mut [f32]>,
    ) {
        debug_assert_eq!(input.len(), self.c_input);
        debug_assert_eq!(hidden.len(), self.c_hidden);
        debug_assert_eq!(output.len(), self.c_output);

        hidden.copy_from_slice(&self.hidden_threshold);

        for (i, &ari) in input.iter().enumerate() {
            if ari == 0.0 {
                continue;
            }
            let weights = &self.hidden_weight[i * self.c_hidden..(i + 1) * self.c_hidden];
            if ari == 1.0 {
                for (h, &w) in hidden.iter_mut().zip(weights) {
                    *h += w;
                }
            } else {
                for (h, &w) in hidden.iter_mut().zip(weights) {
                    *h += w * ari;
                }
            }
        }

        if let Some(base) = save_base.take() {
            base.copy_from_slice(hidden);
        }

        for h in hidden.iter_mut() {
            *h = sigmoid(-self.beta_hidden * *h);
        }

        self.output_layer(hidden, output);
    }

    /// Evaluation from a saved pre-activation base: `input` holds the
    /// difference against the base input vector.
    fn evaluate_from_base(
        &self,
        diff: &[f32],
        base: &[f32],
        hidden: &mut [f32],
        output: &mut [f32],
    ) {
        hidden.copy_from_slice(base);

        for (i, &ari) in diff.iter().enumerate() {
            if ari == 0.0 {
                continue;
            }
            let weights = &self.hidden_weight[i * self.c_hidden..(i + 1) * self.c_hidden];
            if ari == 1.0 {
                for (h, &w) in hidden.iter_mut().zip(weights) {
                    *h += w;
                }
            } else if ari == -1.0 {
                for (h, &w) in hidden.iter_mut().zip(weights) {
                    *h -= w;
                }
            } else {
                for (h, &w) in hidden.iter_mut().zip(weights) {
                    *h += w * ari;
                }
            }
        }

        for h in hidden.iter_mut() {
            *h = sigmoid(-self.beta_hidden * *h);
        }

        self.output_layer(hidden, output);
    }

    fn output_layer(&self, hidden: &[f32], output: &mut [f32]) {
        for (o, out) in output.iter_mut().enumerate() {
            let weights = &self.output_weight[o * self.c_hidden..(o + 1) * self.c_hidden];
            let mut r = self.output_threshold[o];
            for (&h, &w) in hidden.iter().zip(weights) {
                r += h * w;
            }
            *out = sigmoid(-self.beta_output * r);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum ScratchMode {
    #[default]
    Plain,
    Armed,
    Saved,
}

/// Per-network incremental state. Arm with [`NetScratch::arm`] before the
/// first evaluation of a move-scoring batch; the first call then saves its
/// base, and later calls evaluate from the difference.
#[derive(Debug, Clone, Default)]
pub struct NetScratch {
    mode: ScratchMode,
    saved_base: Vec<f32>,
    saved_input: Vec<f32>,
}

impl NetScratch {
    /// Next evaluation becomes the incremental base.
    pub fn arm(&mut self) {
        self.mode = ScratchMode::Armed;
    }

    /// Back to plain, non-incremental evaluation.
    pub fn disarm(&mut self) {
        self.mode = ScratchMode::Plain;
    }
}

impl NeuralNet {
    /// Evaluates `input`, consulting and updating the incremental state.
    /// `input` is clobbered when an incremental difference is formed.
    pub fn evaluate_incremental(
        &self,
        input: &mut [f32],
        hidden: &mut [f32],
        output: &mut [f32],
        scratch: &mut NetScratch,
    ) {
        match scratch.mode {
            ScratchMode::Plain => self.forward(input, hidden, output, None),
            ScratchMode::Armed => {
                scratch.saved_input.clear();
                scratch.saved_input.extend_from_slice(input);
                scratch.saved_base.resize(self.c_hidden, 0.0);
                let mut base = std::mem::take(&mut scratch.saved_base);
                self.forward(input, hidden, output, Some(&mut base));
                scratch.saved_base = base;
                scratch.mode = ScratchMode::Saved;
            }
            ScratchMode::Saved => {
                for (r, &s) in input.iter_mut().zip(&scratch.saved_input) {
                    if *r != s {
                        *r -= s;
                    } else {
                        *r = 0.0;
                    }
                }
                self.evaluate_from_base(input, &scratch.saved_base, hidden, output);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_net() -> NeuralNet {
        let mut nn = NeuralNet::zeroed(3, 2, 2);
        nn.beta_hidden = 0.1;
        nn.beta_output = 1.0;
        nn.hidden_weight = vec![0.5, -0.25, 1.0, 0.75, -0.5, 0.125];
        nn.output_weight = vec![1.0, -1.0, 0.25, 0.5];
        nn.hidden_threshold = vec![0.1, -0.2];
        nn.output_threshold = vec![0.05, -0.05];
        nn
    }

    #[test]
    fn outputs_are_probabilities() {
        let nn = tiny_net();
        let mut hidden = [0.0; 2];
        let mut output = [0.0; 2];
        nn.evaluate(&[1.0, 0.5, -1.0], &mut hidden, &mut output);
        for &o in &output {
            assert!((0.0..=1.0).contains(&o));
        }
    }

    #[test]
    fn matches_direct_computation() {
        let nn = tiny_net();
        let input = [1.0f32, 0.0, 2.0];
        let mut hidden = [0.0; 2];
        let mut output = [0.0; 2];
        nn.evaluate(&input, &mut hidden, &mut output);

        let h0 = 0.1 + 1.0 * 0.5 + 2.0 * (-0.5);
        let h1 = -0.2 + 1.0 * (-0.25) + 2.0 * 0.125;
        let a0 = sigmoid(-0.1 * h0);
        let a1 = sigmoid(-0.1 * h1);
        let o0 = sigmoid(-(0.05 + a0 * 1.0 + a1 * (-1.0)));
        assert!((output[0] - o0).abs() < 1e-6);
        assert!((hidden[0] - a0).abs() < 1e-6);
        assert!((hidden[1] - a1).abs() < 1e-6);
    }

    #[test]
    fn incremental_matches_plain() {
        let nn = tiny_net();
        let mut scratch = NetScratch::default();
        scratch.arm();

        let base_input = [1.0f32, 0.25, 0.0];
        let mut hidden = [0.0; 2];
        let mut out_base = [0.0; 2];
        let mut input = base_input;
        nn.evaluate_incremental(&mut input, &mut hidden, &mut out_base, &mut scratch);

        // a nearby input through the from-base path
        let probe = [1.0f32, 0.75, -0.5];
        let mut input = probe;
        let mut out_inc = [0.0; 2];
        nn.evaluate_incremental(&mut input, &mut hidden, &mut out_inc, &mut scratch);

        let mut out_plain = [0.0; 2];
        nn.evaluate(&probe, &mut hidden, &mut out_plain);

        for (a, b) in out_inc.iter().zip(&out_plain) {
            assert!((a - b).abs() < 1e-5);
        }

        // the base itself re-evaluates exactly through the diff path
        let mut input = base_input;
        let mut out_again = [0.0; 2];
        nn.evaluate_incremental(&mut input, &mut hidden, &mut out_again, &mut scratch);
        for (a, b) in out_again.iter().zip(&out_base) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn disarm_restores_plain_path() {
        let nn = tiny_net();
        let mut scratch = NetScratch::default();
        scratch.arm();
        let mut hidden = [0.0; 2];
        let mut output = [0.0; 2];
        let mut input = [0.5f32, 0.5, 0.5];
        nn.evaluate_incremental(&mut input, &mut hidden, &mut output, &mut scratch);
        scratch.disarm();

        let probe = [0.0f32, 1.0, 0.0];
        let mut input = probe;
        let mut out_inc = [0.0; 2];
        nn.evaluate_incremental(&mut input, &mut hidden, &mut out_inc, &mut scratch);
        let mut out_plain = [0.0; 2];
        nn.evaluate(&probe, &mut hidden, &mut out_plain);
        assert_eq!(out_inc, out_plain);
    }
}

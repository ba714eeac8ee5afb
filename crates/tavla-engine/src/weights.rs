//! Network weight files. Two interoperable formats: a little-endian binary
//! file opened with a float magic/version pair, and the legacy text format
//! with one weight per line. Both carry six networks in a fixed order:
//! contact, race, crashed, then the pruning trio.

use std::fs;
use std::path::Path;

use log::info;

use tavla_core::NUM_OUTPUTS;

use crate::error::{EngineError, Result};
use crate::inputs::{NUM_INPUTS, NUM_PRUNING_INPUTS, NUM_RACE_INPUTS};
use crate::neural::NeuralNet;

const WEIGHTS_MAGIC_BINARY: f32 = 472.3782;
const WEIGHTS_VERSION_BINARY: f32 = 1.00;
const WEIGHTS_VERSION_TEXT: &str = "1.00";

/// The full set of evaluation networks.
#[derive(Debug, Clone, PartialEq)]
pub struct Weights {
    pub contact: NeuralNet,
    pub race: NeuralNet,
    pub crashed: NeuralNet,
    pub prune_contact: NeuralNet,
    pub prune_crashed: NeuralNet,
    pub prune_race: NeuralNet,
}

impl Weights {
    /// Untrained networks of the correct dimensions. Every output is 0.5;
    /// useful as a fixture and for training from scratch.
    pub fn zeroed() -> Self {
        Self {
            contact: NeuralNet::zeroed(NUM_INPUTS, 128, NUM_OUTPUTS),
            race: NeuralNet::zeroed(NUM_RACE_INPUTS, 128, NUM_OUTPUTS),
            crashed: NeuralNet::zeroed(NUM_INPUTS, 128, NUM_OUTPUTS),
            prune_contact: NeuralNet::zeroed(NUM_PRUNING_INPUTS, 10, NUM_OUTPUTS),
            prune_crashed: NeuralNet::zeroed(NUM_PRUNING_INPUTS, 10, NUM_OUTPUTS),
            prune_race: NeuralNet::zeroed(NUM_PRUNING_INPUTS, 10, NUM_OUTPUTS),
        }
    }

    /// Loads a weights file, auto-detecting binary or text.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        let weights = if data.len() >= 8 && data[0..4] == WEIGHTS_MAGIC_BINARY.to_le_bytes() {
            Self::from_binary(&data)
        } else {
            let text = std::str::from_utf8(&data)
                .map_err(|_| EngineError::WeightFormat("not a text weights file".into()))?;
            Self::from_text(text)
        }?;
        info!(
            "loaded evaluation networks from {} ({} hidden contact nodes)",
            path.as_ref().display(),
            weights.contact.c_hidden
        );
        Ok(weights)
    }

    pub fn from_binary(data: &[u8]) -> Result<Self> {
        let mut offset = 0usize;
        let magic = read_f32(data, &mut offset)?;
        let version = read_f32(data, &mut offset)?;
        if magic != WEIGHTS_MAGIC_BINARY || version != WEIGHTS_VERSION_BINARY {
            return Err(EngineError::WeightFormat(format!(
                "bad magic/version {magic}/{version}"
            )));
        }

        let weights = Self {
            contact: read_net_binary(data, &mut offset)?,
            race: read_net_binary(data, &mut offset)?,
            crashed: read_net_binary(data, &mut offset)?,
            prune_contact: read_net_binary(data, &mut offset)?,
            prune_crashed: read_net_binary(data, &mut offset)?,
            prune_race: read_net_binary(data, &mut offset)?,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&WEIGHTS_MAGIC_BINARY.to_le_bytes());
        buf.extend_from_slice(&WEIGHTS_VERSION_BINARY.to_le_bytes());
        for net in self.nets() {
            write_net_binary(&mut buf, net);
        }
        buf
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| EngineError::WeightFormat("empty weights file".into()))?;
        let version = header
            .strip_prefix("GNU Backgammon ")
            .ok_or_else(|| EngineError::WeightFormat("bad text header".into()))?;
        if version.trim() != WEIGHTS_VERSION_TEXT {
            return Err(EngineError::WeightFormat(format!(
                "unsupported weights version {version}"
            )));
        }

        let weights = Self {
            contact: read_net_text(&mut lines)?,
            race: read_net_text(&mut lines)?,
            crashed: read_net_text(&mut lines)?,
            prune_contact: read_net_text(&mut lines)?,
            prune_crashed: read_net_text(&mut lines)?,
            prune_race: read_net_text(&mut lines)?,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn to_text(&self) -> String {
        let mut out = format!("GNU Backgammon {WEIGHTS_VERSION_TEXT}\n");
        for net in self.nets() {
            out.push_str(&format!(
                "{} {} {} {} {:.9} {:.9}\n",
                net.c_input,
                net.c_hidden,
                net.c_output,
                net.n_trained,
                net.beta_hidden,
                net.beta_output
            ));
            for &w in net
                .hidden_weight
                .iter()
                .chain(&net.output_weight)
                .chain(&net.hidden_threshold)
                .chain(&net.output_threshold)
            {
                out.push_str(&format!("{w:.9}\n"));
            }
        }
        out
    }

    fn nets(&self) -> [&NeuralNet; 6] {
        [
            &self.contact,
            &self.race,
            &self.crashed,
            &self.prune_contact,
            &self.prune_crashed,
            &self.prune_race,
        ]
    }

    fn validate(&self) -> Result<()> {
        let dims = [
            ("contact", &self.contact, NUM_INPUTS),
            ("race", &self.race, NUM_RACE_INPUTS),
            ("crashed", &self.crashed, NUM_INPUTS),
            ("pruning contact", &self.prune_contact, NUM_PRUNING_INPUTS),
            ("pruning crashed", &self.prune_crashed, NUM_PRUNING_INPUTS),
            ("pruning race", &self.prune_race, NUM_PRUNING_INPUTS),
        ];
        for (name, net, c_input) in dims {
            if net.c_input != c_input || net.c_output != NUM_OUTPUTS {
                return Err(EngineError::WeightFormat(format!(
                    "{name} net is {}x{}, expected {c_input}x{NUM_OUTPUTS}",
                    net.c_input, net.c_output
                )));
            }
        }
        Ok(())
    }
}

fn read_f32(data: &[u8], offset: &mut usize) -> Result<f32> {
    let bytes: [u8; 4] = data
        .get(*offset..*offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| EngineError::WeightFormat("truncated weights file".into()))?;
    *offset += 4;
    Ok(f32::from_le_bytes(bytes))
}

fn read_u32(data: &[u8], offset: &mut usize) -> Result<u32> {
    let bytes: [u8; 4] = data
        .get(*offset..*offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| EngineError::WeightFormat("truncated weights file".into()))?;
    *offset += 4;
    Ok(u32::from_le_bytes(bytes))
}

fn read_f32_array(data: &[u8], offset: &mut usize, count: usize) -> Result<Vec<f32>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(read_f32(data, offset)?);
    }
    Ok(out)
}

fn read_net_binary(data: &[u8], offset: &mut usize) -> Result<NeuralNet> {
    let c_input = read_u32(data, offset)? as usize;
    let c_hidden = read_u32(data, offset)? as usize;
    let c_output = read_u32(data, offset)? as usize;
    let n_trained = read_u32(data, offset)? as i32;
    let beta_hidden = read_f32(data, offset)?;
    let beta_output = read_f32(data, offset)?;

    if c_input == 0 || c_hidden == 0 || c_output == 0 || c_input > 4096 || c_hidden > 4096 {
        return Err(EngineError::WeightFormat(format!(
            "implausible net dimensions {c_input}x{c_hidden}x{c_output}"
        )));
    }

    Ok(NeuralNet {
        c_input,
        c_hidden,
        c_output,
        n_trained,
        beta_hidden,
        beta_output,
        hidden_weight: read_f32_array(data, offset, c_input * c_hidden)?,
        output_weight: read_f32_array(data, offset, c_output * c_hidden)?,
        hidden_threshold: read_f32_array(data, offset, c_hidden)?,
        output_threshold: read_f32_array(data, offset, c_output)?,
    })
}

fn write_net_binary(buf: &mut Vec<u8>, net: &NeuralNet) {
    buf.extend_from_slice(&(net.c_input as u32).to_le_bytes());
    buf.extend_from_slice(&(net.c_hidden as u32).to_le_bytes());
    buf.extend_from_slice(&(net.c_output as u32).to_le_bytes());
    buf.extend_from_slice(&net.n_trained.to_le_bytes());
    buf.extend_from_slice(&net.beta_hidden.to_le_bytes());
    buf.extend_from_slice(&net.beta_output.to_le_bytes());
    for &w in net
        .hidden_weight
        .iter()
        .chain(&net.output_weight)
        .chain(&net.hidden_threshold)
        .chain(&net.output_threshold)
    {
        buf.extend_from_slice(&w.to_le_bytes());
    }
}

fn read_net_text<'a>(lines: &mut impl Iterator<Item = &'a str>) -> Result<NeuralNet> {
    let header = lines
        .next()
        .ok_or_else(|| EngineError::WeightFormat("missing net header".into()))?;
    let mut fields = header.split_whitespace();
    let mut next = |what: &str| {
        fields
            .next()
            .ok_or_else(|| EngineError::WeightFormat(format!("missing {what}")))
    };
    let c_input: usize = parse(next("input count")?)?;
    let c_hidden: usize = parse(next("hidden count")?)?;
    let c_output: usize = parse(next("output count")?)?;
    let n_trained: i32 = parse(next("trained count")?)?;
    let beta_hidden: f32 = parse(next("hidden beta")?)?;
    let beta_output: f32 = parse(next("output beta")?)?;

    let mut read_array = |count: usize| -> Result<Vec<f32>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let line = lines
                .next()
                .ok_or_else(|| EngineError::WeightFormat("truncated weights file".into()))?;
            out.push(parse(line.trim())?);
        }
        Ok(out)
    };

    Ok(NeuralNet {
        c_input,
        c_hidden,
        c_output,
        n_trained,
        beta_hidden,
        beta_output,
        hidden_weight: read_array(c_input * c_hidden)?,
        output_weight: read_array(c_output * c_hidden)?,
        hidden_threshold: read_array(c_hidden)?,
        output_threshold: read_array(c_output)?,
    })
}

fn parse<T: std::str::FromStr>(s: &str) -> Result<T> {
    s.parse()
        .map_err(|_| EngineError::WeightFormat(format!("bad number {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_round_trip() {
        let mut weights = Weights::zeroed();
        weights.contact.n_trained = 100_000;
        weights.contact.hidden_weight[17] = -0.375;
        weights.race.output_threshold[2] = 1.5;
        weights.prune_race.beta_hidden = 0.25;

        let bytes = weights.to_binary();
        let restored = Weights::from_binary(&bytes).unwrap();
        assert_eq!(weights, restored);
    }

    #[test]
    fn text_round_trip() {
        let mut weights = Weights::zeroed();
        weights.crashed.hidden_threshold[5] = -2.0;
        weights.prune_contact.output_weight[3] = 0.0625;

        let text = weights.to_text();
        let restored = Weights::from_text(&text).unwrap();
        assert_eq!(weights, restored);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = Weights::zeroed().to_binary();
        bytes[0] ^= 0xff;
        assert!(matches!(
            Weights::from_binary(&bytes),
            Err(EngineError::WeightFormat(_))
        ));
    }

    #[test]
    fn truncation_rejected() {
        let bytes = Weights::zeroed().to_binary();
        assert!(matches!(
            Weights::from_binary(&bytes[..bytes.len() / 2]),
            Err(EngineError::WeightFormat(_))
        ));
    }

    #[test]
    fn wrong_dimensions_rejected() {
        let mut weights = Weights::zeroed();
        weights.race = crate::neural::NeuralNet::zeroed(100, 8, NUM_OUTPUTS);
        let bytes = weights.to_binary();
        assert!(matches!(
            Weights::from_binary(&bytes),
            Err(EngineError::WeightFormat(_))
        ));
    }
}

// src/entropy/arithmetic.rs

//! Multi-context arithmetic coder with 16-bit code values.
//!
//! Each context owns a frequency model over its symbols plus one end-of-data
//! symbol. Adaptive models keep the most frequent symbol at the lowest index and
//! halve every count once the total reaches [`MAX_FREQUENCY`]. The encoder can be
//! given a bit budget, checked after every output bit. The decoder can be given
//! a read limit; past it (or past the input) it only returns symbols that the
//! bits already read fully determine, and reports exhaustion otherwise.

use log::{debug, trace, warn};

use super::EntropyError;
use super::bit_buffer::{BitReader, BitWriter};

pub const CODE_VALUE_BITS: u32 = 16;
pub const TOP_VALUE: i64 = (1 << CODE_VALUE_BITS) - 1;
pub const FIRST_QUARTER: i64 = TOP_VALUE / 4 + 1;
pub const HALF: i64 = 2 * FIRST_QUARTER;
pub const THIRD_QUARTER: i64 = 3 * FIRST_QUARTER;
pub const MAX_FREQUENCY: u32 = (1 << 14) - 1;

/// Slack on the probability sum for rounding in caller arithmetic.
const PROBABILITY_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Adaptation {
    #[default]
    Adaptive,
    /// Frequencies only change through explicit probabilities.
    Fixed,
}

/// Frequency model of one context. Index 0 is a sentinel; symbol `s` starts at
/// index `s + 1` and the end-of-data symbol takes the last index.
#[derive(Debug, Clone)]
struct ContextModel {
    /// Data symbols plus end-of-data.
    num_symbols: usize,
    symbol_to_index: Vec<usize>,
    index_to_symbol: Vec<usize>,
    frequencies: Vec<u32>,
    cumulative: Vec<u32>,
}

impl ContextModel {
    fn new(data_symbols: usize) -> Self {
        let num_symbols = data_symbols + 1;
        let mut model = Self {
            num_symbols,
            symbol_to_index: (0..num_symbols).map(|s| s + 1).collect(),
            index_to_symbol: (0..=num_symbols).map(|i| i.saturating_sub(1)).collect(),
            frequencies: vec![0; num_symbols + 1],
            cumulative: vec![0; num_symbols + 1],
        };
        model.reset();
        model
    }

    fn reset(&mut self) {
        for i in 0..=self.num_symbols {
            self.frequencies[i] = 1;
            self.cumulative[i] = (self.num_symbols - i) as u32;
        }
        self.frequencies[0] = 0;
    }

    fn total(&self) -> u32 {
        self.cumulative[0]
    }

    fn eof_symbol(&self) -> usize {
        self.num_symbols - 1
    }

    /// Recomputes cumulative counts from the top index down, halving first when asked.
    fn rebuild_cumulative(&mut self, halve: bool) {
        let mut cum = 0;
        for i in (0..=self.num_symbols).rev() {
            if halve {
                self.frequencies[i] = self.frequencies[i].div_ceil(2);
            }
            self.cumulative[i] = cum;
            cum += self.frequencies[i];
        }
    }

    fn update(&mut self, index: usize) {
        if self.total() == MAX_FREQUENCY {
            self.rebuild_cumulative(true);
        }

        let mut new_index = index;
        while self.frequencies[new_index] == self.frequencies[new_index - 1] {
            new_index -= 1;
        }
        if new_index < index {
            let moved = self.index_to_symbol[new_index];
            let promoted = self.index_to_symbol[index];
            self.index_to_symbol[new_index] = promoted;
            self.index_to_symbol[index] = moved;
            self.symbol_to_index[moved] = index;
            self.symbol_to_index[promoted] = new_index;
        }

        self.frequencies[new_index] += 1;
        for c in &mut self.cumulative[..new_index] {
            *c += 1;
        }
    }

    fn set_probabilities(&mut self, probabilities: &[f64]) -> Result<(), EntropyError> {
        let data_symbols = self.num_symbols - 1;
        if let Some(&bad) = probabilities[..data_symbols.min(probabilities.len())]
            .iter()
            .find(|p| !(0.0..=1.0).contains(*p))
        {
            return Err(EntropyError::InvalidProbability(bad));
        }
        if probabilities.len() < data_symbols {
            return Err(EntropyError::BadSymbol {
                symbol: probabilities.len(),
                context: 0,
            });
        }
        let sum: f64 = probabilities[..data_symbols].iter().sum();
        if sum > 1.0 + PROBABILITY_SUM_TOLERANCE {
            return Err(EntropyError::ProbabilitySum(sum));
        }

        let max_freq = MAX_FREQUENCY - self.num_symbols as u32 + 1;
        for (symbol, &p) in probabilities[..data_symbols].iter().enumerate() {
            let freq = (MAX_FREQUENCY as f64 * p).round() as i64;
            let index = self.symbol_to_index[symbol];
            self.frequencies[index] = freq.clamp(1, max_freq as i64) as u32;
        }
        self.rebuild_cumulative(false);
        if self.total() >= MAX_FREQUENCY {
            self.rebuild_cumulative(true);
        }
        Ok(())
    }
}

/// The per-context frequency tables shared by both coder directions.
#[derive(Debug, Clone)]
struct Models {
    contexts: Vec<ContextModel>,
    adaptation: Adaptation,
}

impl Models {
    fn new(num_symbols: &[usize]) -> Self {
        Self {
            contexts: num_symbols.iter().map(|&n| ContextModel::new(n)).collect(),
            adaptation: Adaptation::Adaptive,
        }
    }

    fn context(&self, context: usize) -> Result<&ContextModel, EntropyError> {
        self.contexts.get(context).ok_or(EntropyError::BadContext {
            context,
            available: self.contexts.len(),
        })
    }

    fn context_mut(&mut self, context: usize) -> Result<&mut ContextModel, EntropyError> {
        let available = self.contexts.len();
        self.contexts
            .get_mut(context)
            .ok_or(EntropyError::BadContext { context, available })
    }

    fn set_probabilities(&mut self, context: usize, probabilities: &[f64]) -> Result<(), EntropyError> {
        if self.adaptation == Adaptation::Adaptive {
            return Err(EntropyError::AdaptiveModel);
        }
        self.context_mut(context)?
            .set_probabilities(probabilities)
            .map_err(|e| match e {
                EntropyError::BadSymbol { symbol, .. } => EntropyError::BadSymbol { symbol, context },
                other => other,
            })
    }
}

/// Narrows `[low, high]` to the interval of `index` within `model`.
#[inline]
fn narrow(low: &mut i64, high: &mut i64, model: &ContextModel, index: usize) {
    let range = *high - *low + 1;
    let total = model.total() as i64;
    *high = *low + (range * model.cumulative[index - 1] as i64) / total - 1;
    *low += (range * model.cumulative[index] as i64) / total;
}

#[derive(Debug, Clone)]
pub struct ArithmeticEncoder {
    models: Models,
    low: i64,
    high: i64,
    bits_to_follow: u64,
    target_bits: Option<u64>,
}

impl ArithmeticEncoder {
    /// `num_symbols[c]` is the alphabet size of context `c`, excluding end-of-data.
    pub fn new(num_symbols: &[usize], target_bits: Option<u64>) -> Self {
        Self {
            models: Models::new(num_symbols),
            low: 0,
            high: TOP_VALUE,
            bits_to_follow: 0,
            target_bits,
        }
    }

    pub fn set_adaptation(&mut self, adaptation: Adaptation) {
        self.models.adaptation = adaptation;
    }

    /// Installs fixed symbol probabilities; only valid on a [`Adaptation::Fixed`] coder.
    pub fn set_probabilities(&mut self, context: usize, probabilities: &[f64]) -> Result<(), EntropyError> {
        self.models.set_probabilities(context, probabilities)
    }

    pub fn reset_context(&mut self, context: usize) -> Result<(), EntropyError> {
        self.models.context_mut(context)?.reset();
        Ok(())
    }

    pub fn target_bits(&self) -> Option<u64> {
        self.target_bits
    }

    fn output_bit(&mut self, out: &mut BitWriter, bit: bool) -> Result<(), EntropyError> {
        out.put_bit(bit);
        self.check_budget(out)?;
        while self.bits_to_follow > 0 {
            out.put_bit(!bit);
            self.check_budget(out)?;
            self.bits_to_follow -= 1;
        }
        Ok(())
    }

    #[inline]
    fn check_budget(&self, out: &BitWriter) -> Result<(), EntropyError> {
        match self.target_bits {
            Some(target) if out.bit_count() >= target => Err(EntropyError::BudgetReached(target)),
            _ => Ok(()),
        }
    }

    fn encode_index(&mut self, out: &mut BitWriter, context: usize, index: usize) -> Result<(), EntropyError> {
        let model = self.models.context(context)?;
        narrow(&mut self.low, &mut self.high, model, index);

        loop {
            if self.high < HALF {
                self.output_bit(out, false)?;
            } else if self.low >= HALF {
                self.output_bit(out, true)?;
                self.low -= HALF;
                self.high -= HALF;
            } else if self.low >= FIRST_QUARTER && self.high < THIRD_QUARTER {
                self.bits_to_follow += 1;
                self.low -= FIRST_QUARTER;
                self.high -= FIRST_QUARTER;
            } else {
                break;
            }
            self.low *= 2;
            self.high = 2 * self.high + 1;
        }
        Ok(())
    }

    pub fn encode(&mut self, out: &mut BitWriter, context: usize, symbol: usize) -> Result<(), EntropyError> {
        let model = self.models.context(context)?;
        if symbol >= model.eof_symbol() {
            return Err(EntropyError::BadSymbol { symbol, context });
        }
        let index = model.symbol_to_index[symbol];
        #[cfg(feature = "debug-logging")]
        trace!("encode ctx={} sym={} idx={}", context, symbol, index);

        self.encode_index(out, context, index)?;
        if self.models.adaptation == Adaptation::Adaptive {
            self.models.contexts[context].update(index);
        }
        Ok(())
    }

    #[inline]
    pub fn encode_bit(&mut self, out: &mut BitWriter, context: usize, bit: bool) -> Result<(), EntropyError> {
        self.encode(out, context, bit as usize)
    }

    /// Codes the end-of-data symbol of `context`.
    pub fn encode_eof(&mut self, out: &mut BitWriter, context: usize) -> Result<(), EntropyError> {
        let index = self.models.context(context)?.num_symbols;
        self.encode_index(out, context, index)
    }

    /// Emits the disambiguating tail bits and byte-aligns the output.
    pub fn flush(&mut self, out: &mut BitWriter) -> Result<(), EntropyError> {
        self.bits_to_follow += 1;
        let bit = self.low >= FIRST_QUARTER;
        self.output_bit(out, bit)?;
        out.align();
        trace!("arithmetic encoder flushed at {} bits", out.bit_count());

        self.low = 0;
        self.high = TOP_VALUE;
        self.bits_to_follow = 0;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ArithmeticDecoder {
    models: Models,
    low: i64,
    high: i64,
    code: i64,
    garbage_bits: u32,
    target_bits: Option<u64>,
}

impl ArithmeticDecoder {
    /// Primes the decoder with the first code value from `input`.
    pub fn start(input: &mut BitReader<'_>, num_symbols: &[usize], target_bits: Option<u64>) -> Result<Self, EntropyError> {
        let mut decoder = Self {
            models: Models::new(num_symbols),
            low: 0,
            high: TOP_VALUE,
            code: 0,
            garbage_bits: 0,
            target_bits,
        };
        decoder.prime(input)?;
        Ok(decoder)
    }

    /// Byte-aligns `input` and re-primes, keeping the models.
    pub fn restart(&mut self, input: &mut BitReader<'_>, target_bits: Option<u64>) -> Result<(), EntropyError> {
        input.align();
        self.target_bits = target_bits;
        self.low = 0;
        self.high = TOP_VALUE;
        self.prime(input)
    }

    fn prime(&mut self, input: &mut BitReader<'_>) -> Result<(), EntropyError> {
        self.code = 0;
        self.garbage_bits = 0;
        for _ in 0..CODE_VALUE_BITS {
            self.code = 2 * self.code + self.next_bit(input) as i64;
        }
        Ok(())
    }

    pub fn set_adaptation(&mut self, adaptation: Adaptation) {
        self.models.adaptation = adaptation;
    }

    pub fn set_probabilities(&mut self, context: usize, probabilities: &[f64]) -> Result<(), EntropyError> {
        self.models.set_probabilities(context, probabilities)
    }

    pub fn reset_context(&mut self, context: usize) -> Result<(), EntropyError> {
        self.models.context_mut(context)?.reset();
        Ok(())
    }

    /// Zero bits supplied so far beyond the readable input. They fill the low
    /// end of the code value.
    pub fn garbage_bits(&self) -> u32 {
        self.garbage_bits
    }

    fn next_bit(&mut self, input: &mut BitReader<'_>) -> bool {
        let within_limit = self.target_bits.is_none_or(|t| input.bit_count() < t);
        if within_limit {
            if let Some(bit) = input.get_bit() {
                return bit;
            }
        }

        self.garbage_bits = self.garbage_bits.saturating_add(1);
        if self.garbage_bits == 1 {
            debug!("arithmetic decoder ran past the end of its input at {} bits", input.bit_count());
        }
        false
    }

    /// Index whose interval holds `code` under the current `[low, high]`.
    fn index_of(&self, model: &ContextModel, code: i64) -> usize {
        let range = self.high - self.low + 1;
        let total = model.total() as i64;
        let target = ((code - self.low + 1) * total - 1) / range;

        let mut index = 1;
        while index < model.num_symbols && model.cumulative[index] as i64 > target {
            index += 1;
        }
        index
    }

    /// Decodes one symbol. The end-of-data symbol surfaces as [`EntropyError::EndOfData`].
    ///
    /// Once garbage bits sit in the code value, the true value lies anywhere in
    /// `[code, code + 2^garbage)`. A symbol is only returned when both ends of
    /// that range select it; otherwise the decoder reports
    /// [`EntropyError::Exhausted`] and leaves its state untouched.
    pub fn decode(&mut self, input: &mut BitReader<'_>, context: usize) -> Result<usize, EntropyError> {
        let model = self.models.context(context)?;
        let unknown = self.garbage_bits.min(CODE_VALUE_BITS);
        let index = if unknown == 0 {
            self.index_of(model, self.code)
        } else {
            let (lowest, highest) = if unknown == CODE_VALUE_BITS {
                (self.low, self.high)
            } else {
                (
                    self.code.max(self.low),
                    (self.code + (1 << unknown) - 1).min(self.high),
                )
            };
            let index = self.index_of(model, lowest);
            if lowest > highest || self.index_of(model, highest) != index {
                warn!(
                    "arithmetic decoder stopped: next symbol depends on {} bits past the input",
                    unknown
                );
                return Err(EntropyError::Exhausted);
            }
            index
        };
        let symbol = model.index_to_symbol[index];
        let is_eof = index == model.num_symbols;
        narrow(&mut self.low, &mut self.high, model, index);

        loop {
            if self.high < HALF {
                // nothing to subtract
            } else if self.low >= HALF {
                self.code -= HALF;
                self.low -= HALF;
                self.high -= HALF;
            } else if self.low >= FIRST_QUARTER && self.high < THIRD_QUARTER {
                self.code -= FIRST_QUARTER;
                self.low -= FIRST_QUARTER;
                self.high -= FIRST_QUARTER;
            } else {
                break;
            }
            self.low *= 2;
            self.high = 2 * self.high + 1;
            self.code = 2 * self.code + self.next_bit(input) as i64;
        }

        if is_eof {
            return Err(EntropyError::EndOfData);
        }
        #[cfg(feature = "debug-logging")]
        trace!("decode ctx={} sym={} idx={}", context, symbol, index);
        if self.models.adaptation == Adaptation::Adaptive {
            self.models.contexts[context].update(index);
        }
        Ok(symbol)
    }

    #[inline]
    pub fn decode_bit(&mut self, input: &mut BitReader<'_>, context: usize) -> Result<bool, EntropyError> {
        Ok(self.decode(input, context)? == 1)
    }
}

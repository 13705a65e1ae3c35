use super::constants::*;

/// Fields of one HGCROC channel word.
///
/// In normal readout the middle field carries the ADC while the ToT/ToA status (`tctp`) is
/// below 2 and the ToT otherwise, and the upper field is the ADC of the previous bunch
/// crossing. In characterization mode ADC and ToT are both sent and there is no BX-1 sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelData {
    pub tctp: u8,
    pub adc: u16,
    pub adcm1: u16,
    pub tot: u16,
    pub toa: u16,
}

fn field(word: u32, shift: u32) -> u16 {
    ((word >> shift) & CH_FIELD_MASK) as u16
}

impl ChannelData {
    pub fn decode(word: u32, char_mode: bool) -> Self {
        let tctp = ((word >> CH_TCTP_SHIFT) & CH_TCTP_MASK) as u8;
        let toa = field(word, CH_FIELD2_SHIFT);
        if char_mode {
            Self {
                tctp,
                adc: field(word, CH_FIELD0_SHIFT),
                adcm1: 0,
                tot: field(word, CH_FIELD1_SHIFT),
                toa,
            }
        } else {
            let middle = field(word, CH_FIELD1_SHIFT);
            let (adc, tot) = if tctp < TCTP_TOT_THRESHOLD {
                (middle, 0)
            } else {
                (0, middle)
            };
            Self {
                tctp,
                adc,
                adcm1: field(word, CH_FIELD0_SHIFT),
                tot,
                toa,
            }
        }
    }

    /// Inverse of [`ChannelData::decode`] for the fields the mode carries
    pub fn encode(&self, char_mode: bool) -> u32 {
        let (upper, middle) = if char_mode {
            (self.adc, self.tot)
        } else if self.tctp < TCTP_TOT_THRESHOLD {
            (self.adcm1, self.adc)
        } else {
            (self.adcm1, self.tot)
        };
        ((self.tctp as u32 & CH_TCTP_MASK) << CH_TCTP_SHIFT)
            | ((upper as u32 & CH_FIELD_MASK) << CH_FIELD0_SHIFT)
            | ((middle as u32 & CH_FIELD_MASK) << CH_FIELD1_SHIFT)
            | ((self.toa as u32 & CH_FIELD_MASK) << CH_FIELD2_SHIFT)
    }

    pub fn is_tot_saturated(&self) -> bool {
        self.tctp == TCTP_TOT_SATURATED
    }

    pub fn has_tot(&self) -> bool {
        self.tctp >= TCTP_TOT_THRESHOLD
    }
}

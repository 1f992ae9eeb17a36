//! PUCCH Payload Helpers
//!
//! Rate-matching quantities of TS 38.212 6.3.1 and DM-RS symbol counts of
//! TS 38.211 6.4.1.3.3 needed to derive the PUCCH delta_TF term.

/// Data subcarriers per PRB in PUCCH Format 2 (the rest carry DM-RS)
pub const FORMAT2_NOF_DATA_SC: u32 = 8;

/// Subcarriers per resource block
pub const NOF_SUBCARRIERS_PER_RB: u32 = 12;

/// Spreading factor assumed for PUCCH Format 4
const FORMAT4_SPREADING_FACTOR: u32 = 2;

/// Number of DM-RS symbols of a PUCCH Format 3/4 resource (TS 38.211 Table 6.4.1.3.3.2-1)
pub fn get_pucch_format3_4_nof_dmrs_symbols(
    nof_symbols: u32,
    intraslot_freq_hopping: bool,
    additional_dmrs: bool,
) -> u32 {
    assert!(
        (4..=14).contains(&nof_symbols),
        "Invalid number of PUCCH F3/F4 symbols {}",
        nof_symbols
    );
    match nof_symbols {
        4 if intraslot_freq_hopping => 2,
        4 => 1,
        5..=9 => 2,
        _ if additional_dmrs => 4,
        _ => 2,
    }
}

/// Rate matching output length E_tot of PUCCH Format 2
pub fn get_pucch_format2_e_total(nof_prbs: u32, nof_symbols: u32) -> u32 {
    16 * nof_prbs * nof_symbols
}

/// Rate matching output length E_tot of PUCCH Format 3
pub fn get_pucch_format3_e_total(nof_prbs: u32, nof_symbols: u32, pi_2_bpsk: bool) -> u32 {
    let data_symbols = nof_symbols - get_pucch_format3_4_nof_dmrs_symbols(nof_symbols, false, false);
    let qm = if pi_2_bpsk { 1 } else { 2 };
    nof_prbs * NOF_SUBCARRIERS_PER_RB * data_symbols * qm
}

/// Rate matching output length E_tot of PUCCH Format 4
pub fn get_pucch_format4_e_total(nof_prbs: u32, nof_symbols: u32, pi_2_bpsk: bool) -> u32 {
    get_pucch_format3_e_total(nof_prbs, nof_symbols, pi_2_bpsk) / FORMAT4_SPREADING_FACTOR
}

/// Number of CRC bits attached to a UCI payload of `nof_bits` (TS 38.212 6.3.1.2.1)
pub fn get_uci_nof_crc_bits(nof_bits: u32, e_uci: u32) -> u32 {
    match nof_bits {
        0..=11 => 0,
        12..=19 => 6,
        _ => {
            // Code block segmentation doubles the CRC overhead
            if (nof_bits >= 360 && e_uci >= 1088) || nof_bits >= 1013 {
                22
            } else {
                11
            }
        }
    }
}

/// Accumulated power adjustment, in dB, of a TPC command (TS 38.213 Tables 7.1.1-1 and 7.2.1-1)
pub fn tpc_mapping(tpc_command: u8) -> i32 {
    match tpc_command {
        0 => -1,
        1 => 0,
        2 => 1,
        3 => 3,
        _ => panic!("Invalid TPC command {}", tpc_command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dmrs_symbols() {
        assert_eq!(get_pucch_format3_4_nof_dmrs_symbols(4, false, false), 1);
        assert_eq!(get_pucch_format3_4_nof_dmrs_symbols(4, true, false), 2);
        assert_eq!(get_pucch_format3_4_nof_dmrs_symbols(7, false, true), 2);
        assert_eq!(get_pucch_format3_4_nof_dmrs_symbols(14, false, true), 4);
        assert_eq!(get_pucch_format3_4_nof_dmrs_symbols(14, false, false), 2);
    }

    #[test]
    fn test_crc_bits() {
        assert_eq!(get_uci_nof_crc_bits(11, 100), 0);
        assert_eq!(get_uci_nof_crc_bits(12, 100), 6);
        assert_eq!(get_uci_nof_crc_bits(20, 100), 11);
        assert_eq!(get_uci_nof_crc_bits(400, 2000), 22);
    }

    #[test]
    fn test_e_totals() {
        assert_eq!(get_pucch_format2_e_total(1, 2), 32);
        assert_eq!(get_pucch_format3_e_total(1, 14, false), 12 * 12 * 2);
        assert_eq!(get_pucch_format4_e_total(1, 14, true), 12 * 12 / 2);
    }

    #[test]
    fn test_tpc_mapping() {
        assert_eq!(tpc_mapping(0), -1);
        assert_eq!(tpc_mapping(1), 0);
        assert_eq!(tpc_mapping(3), 3);
    }
}

//! MAC subPDU Sizes
//!
//! Subheader arithmetic of TS 38.321 6.1.2 for MAC SDUs and fixed-size MAC CEs.

/// Subheader size of a MAC SDU with an 8-bit L field
pub const MIN_MAC_SDU_SUBHEADER_SIZE: u32 = 2;

/// Subheader size of a MAC SDU with a 16-bit L field
pub const MAX_MAC_SDU_SUBHEADER_SIZE: u32 = 3;

/// SDU payload size from which the 16-bit L field is required
pub const MAC_SDU_SUBHEADER_LENGTH_THRES: u32 = 256;

/// Subheader size of a fixed-size MAC CE
pub const FIXED_SIZED_MAC_CE_SUBHEADER_SIZE: u32 = 1;

/// Bytes needed to carry `payload` bytes as a MAC SDU, subheader included
pub fn get_mac_sdu_required_bytes(payload: u32) -> u32 {
    if payload == 0 {
        return 0;
    }
    if payload < MAC_SDU_SUBHEADER_LENGTH_THRES {
        payload + MIN_MAC_SDU_SUBHEADER_SIZE
    } else {
        payload + MAX_MAC_SDU_SUBHEADER_SIZE
    }
}

/// MAC SDU payload size that fits in `sdu_and_subheader_bytes`
pub fn get_mac_sdu_size(sdu_and_subheader_bytes: u32) -> u32 {
    if sdu_and_subheader_bytes == 0 {
        return 0;
    }
    let sdu_size = sdu_and_subheader_bytes - MIN_MAC_SDU_SUBHEADER_SIZE;
    if sdu_size < MAC_SDU_SUBHEADER_LENGTH_THRES {
        sdu_size
    } else {
        sdu_size - 1
    }
}

//! Minimal contract call encoding
//!
//! The pipeline touches a tiny ABI surface: ERC-20 reads and approvals, the
//! multi-sig wallet's owner/threshold getters and its execute entrypoint.
//! Calls are encoded by hand as selector + 32-byte words; anything richer
//! belongs to the collaborators behind the adapter traits.

use primitive_types::U256;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

// ERC-20
pub const SEL_BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31]; // balanceOf(address)
pub const SEL_ALLOWANCE: [u8; 4] = [0xdd, 0x62, 0xed, 0x3e]; // allowance(address,address)
pub const SEL_APPROVE: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3]; // approve(address,uint256)
pub const SEL_DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67]; // decimals()

// Multi-sig wallet
pub const SEL_GET_OWNERS: [u8; 4] = [0xa0, 0xe6, 0x7e, 0x2b]; // getOwners()
pub const SEL_GET_THRESHOLD: [u8; 4] = [0xe7, 0x52, 0x35, 0xb8]; // getThreshold()
pub const SEL_NONCE: [u8; 4] = [0xaf, 0xfe, 0xd0, 0xe0]; // nonce()
pub const SEL_EXEC_TRANSACTION: [u8; 4] = [0x6a, 0x76, 0x12, 0x02]; // execTransaction(...)

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Parse a 0x-prefixed 20-byte address
pub fn parse_address(address: &str) -> Result<[u8; 20]> {
    let stripped = address
        .strip_prefix("0x")
        .ok_or_else(|| Error::InvalidSignalFormat(format!("address without 0x: {}", address)))?;
    let bytes = hex::decode(stripped)
        .map_err(|e| Error::InvalidSignalFormat(format!("bad address {}: {}", address, e)))?;
    bytes
        .try_into()
        .map_err(|_| Error::InvalidSignalFormat(format!("address wrong length: {}", address)))
}

/// Left-pad an address into an ABI word
pub fn address_word(address: &str) -> Result<[u8; 32]> {
    let raw = parse_address(address)?;
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&raw);
    Ok(word)
}

pub fn uint_word(value: U256) -> [u8; 32] {
    value.to_big_endian()
}

/// Compare an address against the last 20 bytes of a 32-byte topic word
pub fn topic_is_address(topic: &str, address: &str) -> bool {
    let topic = topic.strip_prefix("0x").unwrap_or(topic);
    let address = address.strip_prefix("0x").unwrap_or(address);
    topic.len() == 64 && topic[24..].eq_ignore_ascii_case(address)
}

pub fn encode_balance_of(owner: &str) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&SEL_BALANCE_OF);
    data.extend_from_slice(&address_word(owner)?);
    Ok(data)
}

pub fn encode_allowance(owner: &str, spender: &str) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(68);
    data.extend_from_slice(&SEL_ALLOWANCE);
    data.extend_from_slice(&address_word(owner)?);
    data.extend_from_slice(&address_word(spender)?);
    Ok(data)
}

pub fn encode_approve(spender: &str, amount: U256) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(68);
    data.extend_from_slice(&SEL_APPROVE);
    data.extend_from_slice(&address_word(spender)?);
    data.extend_from_slice(&uint_word(amount));
    Ok(data)
}

pub fn encode_get_owners() -> Vec<u8> {
    SEL_GET_OWNERS.to_vec()
}

pub fn encode_get_threshold() -> Vec<u8> {
    SEL_GET_THRESHOLD.to_vec()
}

/// Decode a single uint256 return word
pub fn decode_uint(data: &[u8]) -> Result<U256> {
    if data.is_empty() {
        return Ok(U256::zero());
    }
    if data.len() < 32 {
        return Err(Error::UnknownError(format!(
            "short uint return: {} bytes",
            data.len()
        )));
    }
    Ok(U256::from_big_endian(&data[..32]))
}

/// Decode a returned dynamic address[] (offset word, length word, entries)
pub fn decode_address_array(data: &[u8]) -> Result<Vec<String>> {
    if data.len() < 64 {
        return Err(Error::UnknownError(format!(
            "short address[] return: {} bytes",
            data.len()
        )));
    }
    let length = U256::from_big_endian(&data[32..64]).as_usize();
    let mut out = Vec::with_capacity(length);
    for i in 0..length {
        let start = 64 + i * 32;
        let end = start + 32;
        if data.len() < end {
            return Err(Error::UnknownError("truncated address[] return".into()));
        }
        out.push(format!("0x{}", hex::encode(&data[start + 12..end])));
    }
    Ok(out)
}

/// Stable digest of a multi-sig payload, signed by the agent signer service.
/// The wallet-side hash scheme lives with the signer collaborator; this is
/// the payload identity the orchestrator logs and correlates on.
pub fn payload_digest(to: &str, value: U256, data: &[u8], nonce: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(to.as_bytes());
    hasher.update(uint_word(value));
    hasher.update(data);
    hasher.update(nonce.to_be_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SPENDER: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn test_encode_balance_of() {
        let data = encode_balance_of(OWNER).unwrap();
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &SEL_BALANCE_OF);
        assert_eq!(&data[16..36], &parse_address(OWNER).unwrap());
    }

    #[test]
    fn test_encode_allowance_layout() {
        let data = encode_allowance(OWNER, SPENDER).unwrap();
        assert_eq!(data.len(), 68);
        assert_eq!(&data[16..36], &parse_address(OWNER).unwrap());
        assert_eq!(&data[48..68], &parse_address(SPENDER).unwrap());
    }

    #[test]
    fn test_encode_approve_max() {
        let data = encode_approve(SPENDER, U256::MAX).unwrap();
        assert_eq!(data.len(), 68);
        assert!(data[36..68].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn test_decode_uint() {
        let mut word = [0u8; 32];
        word[31] = 42;
        assert_eq!(decode_uint(&word).unwrap(), U256::from(42u64));
        assert_eq!(decode_uint(&[]).unwrap(), U256::zero());
        assert!(decode_uint(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_decode_address_array() {
        let mut data = Vec::new();
        data.extend_from_slice(&uint_word(U256::from(32u64))); // offset
        data.extend_from_slice(&uint_word(U256::from(2u64))); // length
        data.extend_from_slice(&address_word(OWNER).unwrap());
        data.extend_from_slice(&address_word(SPENDER).unwrap());
        let owners = decode_address_array(&data).unwrap();
        assert_eq!(owners, vec![OWNER.to_string(), SPENDER.to_string()]);
    }

    #[test]
    fn test_topic_is_address() {
        let topic = format!("0x{}{}", "00".repeat(12), &OWNER[2..]);
        assert!(topic_is_address(&topic, OWNER));
        assert!(!topic_is_address(&topic, SPENDER));
    }

    #[test]
    fn test_bad_address_rejected() {
        assert!(parse_address("aaaa").is_err());
        assert!(parse_address("0x1234").is_err());
        assert!(address_word("0xzz").is_err());
    }
}

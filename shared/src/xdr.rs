//! Helpers over the ledger XDR types for addressing and reading the farm
//! contract's storage.

use stellar_xdr::curr::{
    AccountId,
    ContractDataDurability,
    ContractDataEntry,
    Hash,
    LedgerEntryData,
    LedgerKey,
    LedgerKeyContractData,
    Limits,
    PublicKey,
    ReadXdr,
    ScAddress,
    ScMap,
    ScSymbol,
    ScVal,
    ScVec,
    Uint256,
    WriteXdr,
};

use crate::errors::{FarmError, FarmResult};

pub fn symbol(name: &str) -> FarmResult<ScVal> {
    Ok(ScVal::Symbol(ScSymbol(name.try_into()?)))
}

/// Key of a unit enum variant, e.g. `StorageKey::Index`.
pub fn unit_key(name: &str) -> FarmResult<ScVal> {
    Ok(ScVal::Vec(Some(ScVec(vec![symbol(name)?].try_into()?))))
}

/// Key of a single-field tuple variant, e.g. `StorageKey::Block(7)`.
pub fn tuple_key(name: &str, field: ScVal) -> FarmResult<ScVal> {
    Ok(ScVal::Vec(Some(ScVec(vec![symbol(name)?, field].try_into()?))))
}

pub fn lookup<'a>(map: &'a ScMap, key: &ScVal) -> Option<&'a ScVal> {
    map.0.iter().find(|entry| &entry.key == key).map(|entry| &entry.val)
}

/// Field of a struct value (a map keyed by symbols).
pub fn field<'a>(val: &'a ScVal, name: &str) -> Option<&'a ScVal> {
    match val {
        ScVal::Map(Some(map)) => lookup(map, &symbol(name).ok()?),
        _ => None,
    }
}

pub fn as_u64(val: &ScVal) -> Option<u64> {
    match val {
        ScVal::U32(v) => Some(*v as u64),
        ScVal::U64(v) => Some(*v),
        ScVal::I32(v) => u64::try_from(*v).ok(),
        ScVal::I64(v) => u64::try_from(*v).ok(),
        ScVal::U128(parts) if parts.hi == 0 => Some(parts.lo),
        _ => None,
    }
}

pub fn as_bool(val: &ScVal) -> Option<bool> {
    match val {
        ScVal::Bool(v) => Some(*v),
        _ => None,
    }
}

pub fn as_bytes32(val: &ScVal) -> Option<[u8; 32]> {
    match val {
        ScVal::Bytes(bytes) => bytes.0.as_slice().try_into().ok(),
        _ => None,
    }
}

pub fn as_address(val: &ScVal) -> Option<&ScAddress> {
    match val {
        ScVal::Address(address) => Some(address),
        _ => None,
    }
}

/// `G...` or `C...` text of an address.
pub fn address_strkey(address: &ScAddress) -> String {
    match address {
        ScAddress::Account(AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(key)))) => {
            stellar_strkey::ed25519::PublicKey(*key).to_string()
        }
        ScAddress::Contract(Hash(hash)) => stellar_strkey::Contract(*hash).to_string(),
    }
}

/// Decodes a `C...` id into the contract hash.
pub fn decode_contract(text: &str) -> FarmResult<[u8; 32]> {
    stellar_strkey::Contract::from_string(text)
        .map(|contract| contract.0)
        .map_err(|err| FarmError::StrKey(format!("`{text}` is not a contract id: {err}")))
}

/// Base64 XDR of the `LedgerKey::ContractData` for `key` under `contract`.
pub fn contract_data_key(contract: &[u8; 32], key: ScVal, durability: ContractDataDurability) -> FarmResult<String> {
    let key = LedgerKey::ContractData(LedgerKeyContractData {
        contract: ScAddress::Contract(Hash(*contract)),
        key,
        durability,
    });
    Ok(key.to_xdr_base64(Limits::none())?)
}

pub fn decode_contract_data(xdr: &str) -> FarmResult<ContractDataEntry> {
    match LedgerEntryData::from_xdr_base64(xdr, Limits::none())? {
        LedgerEntryData::ContractData(entry) => Ok(entry),
        _ => Err(FarmError::MalformedEntry("expected a contract data entry".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use stellar_xdr::curr::{ExtensionPoint, ScBytes, ScMapEntry, UInt128Parts};

    use super::*;

    fn block(hash: [u8; 32], miner: [u8; 32]) -> ScVal {
        let entries = vec![
            ScMapEntry { key: symbol("hash").unwrap(), val: ScVal::Bytes(ScBytes(hash.to_vec().try_into().unwrap())) },
            ScMapEntry {
                key: symbol("miner").unwrap(),
                val: ScVal::Address(ScAddress::Account(AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(miner))))),
            },
        ];
        ScVal::Map(Some(ScMap(entries.try_into().unwrap())))
    }

    #[test]
    fn struct_fields() {
        let val = block([0xab; 32], [1; 32]);
        assert_eq!(field(&val, "hash").and_then(as_bytes32), Some([0xab; 32]));
        let miner = field(&val, "miner").and_then(as_address).map(address_strkey).unwrap();
        assert!(miner.starts_with('G'));
        assert_eq!(miner.len(), 56);
        assert_eq!(field(&val, "nonce"), None);
        assert_eq!(field(&ScVal::Void, "hash"), None);
    }

    #[test]
    fn integer_widths() {
        assert_eq!(as_u64(&ScVal::U32(7)), Some(7));
        assert_eq!(as_u64(&ScVal::I64(-1)), None);
        assert_eq!(as_u64(&ScVal::U128(UInt128Parts { hi: 0, lo: 9 })), Some(9));
        assert_eq!(as_u64(&ScVal::U128(UInt128Parts { hi: 1, lo: 9 })), None);
        assert_eq!(as_bool(&ScVal::U32(1)), None);
    }

    #[test]
    fn contract_ids() {
        let text = stellar_strkey::Contract([4; 32]).to_string();
        assert_eq!(decode_contract(&text).unwrap(), [4; 32]);

        let account = stellar_strkey::ed25519::PublicKey([4; 32]).to_string();
        assert!(matches!(decode_contract(&account), Err(FarmError::StrKey(_))));
        assert!(decode_contract("CNOTAKEY").is_err());
    }

    #[test]
    fn keys_name_the_contract_storage_slot() {
        let encoded = contract_data_key(
            &[3; 32],
            tuple_key("Block", ScVal::U64(7)).unwrap(),
            ContractDataDurability::Persistent,
        )
        .unwrap();

        let LedgerKey::ContractData(key) = LedgerKey::from_xdr_base64(&encoded, Limits::none()).unwrap() else {
            panic!("expected a contract data key");
        };
        assert_eq!(key.contract, ScAddress::Contract(Hash([3; 32])));
        assert_eq!(key.durability, ContractDataDurability::Persistent);
        let ScVal::Vec(Some(parts)) = key.key else {
            panic!("expected a tuple key");
        };
        assert_eq!(parts.0.as_slice(), &[symbol("Block").unwrap(), ScVal::U64(7)]);
    }

    #[test]
    fn entry_data_must_be_contract_data() {
        let entry = LedgerEntryData::ContractData(ContractDataEntry {
            ext: ExtensionPoint::V0,
            contract: ScAddress::Contract(Hash([9; 32])),
            key: unit_key("Index").unwrap(),
            durability: ContractDataDurability::Persistent,
            val: ScVal::U32(41),
        });
        let decoded = decode_contract_data(&entry.to_xdr_base64(Limits::none()).unwrap()).unwrap();
        assert_eq!(decoded.val, ScVal::U32(41));

        assert!(matches!(decode_contract_data("AAAA"), Err(FarmError::Xdr(_) | FarmError::MalformedEntry(_))));
        assert!(decode_contract_data("not base64!").is_err());
    }
}

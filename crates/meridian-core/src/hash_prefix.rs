/// 4-byte domain-separation prefixes, hashed ahead of the payload so digests
/// from different contexts can never collide.
///
/// Each prefix is three ASCII letters and a zero byte.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum HashPrefix {
    /// Transaction id.
    TransactionId = 0x5458_4E00, // 'TXN\0'
    /// Transaction-map leaf (tx plus metadata).
    TxNode = 0x534E_4400, // 'SND\0'
    /// State-map leaf.
    LeafNode = 0x4D4C_4E00, // 'MLN\0'
    /// Inner node.
    InnerNode = 0x4D49_4E00, // 'MIN\0'
    /// Inner node, depth-tagged (v2) layout.
    InnerNodeV2 = 0x494E_5200, // 'INR\0'
    /// Ledger header.
    LedgerMaster = 0x4C57_5200, // 'LWR\0'
    /// Signed single-signature transaction payload.
    TxSign = 0x5354_5800, // 'STX\0'
    /// Signed multi-signature transaction payload.
    TxMultiSign = 0x534D_5400, // 'SMT\0'
    /// Signed validation.
    Validation = 0x56414C00, // 'VAL\0'
    /// Signed consensus proposal.
    Proposal = 0x5052_5000, // 'PRP\0'
    /// Validator manifest.
    Manifest = 0x4D41_4E00, // 'MAN\0'
    /// Payment channel claim authorization.
    PaymentChannelClaim = 0x434C_4D00, // 'CLM\0'
}

impl HashPrefix {
    pub fn to_bytes(self) -> [u8; 4] {
        (self as u32).to_be_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_ascii_tags() {
        assert_eq!(&HashPrefix::TransactionId.to_bytes(), b"TXN\0");
        assert_eq!(&HashPrefix::InnerNode.to_bytes(), b"MIN\0");
        assert_eq!(&HashPrefix::LeafNode.to_bytes(), b"MLN\0");
        assert_eq!(&HashPrefix::LedgerMaster.to_bytes(), b"LWR\0");
        assert_eq!(&HashPrefix::TxSign.to_bytes(), b"STX\0");
        assert_eq!(&HashPrefix::TxMultiSign.to_bytes(), b"SMT\0");
    }
}

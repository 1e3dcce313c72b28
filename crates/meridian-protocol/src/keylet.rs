use meridian_core::issue::{Book, Currency};
use meridian_core::types::{AccountId, Hash256};
use meridian_crypto::hash::sha512_half;

/// Namespace tags for state-entry index derivation. Two bytes on the wire;
/// the high byte is zero, the low byte an ASCII mnemonic.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
enum Space {
    Account = b'a',
    DirNode = b'd',
    TrustLine = b'r',
    Offer = b'o',
    OwnerDir = b'O',
    BookDir = b'B',
    SkipList = b's',
    Escrow = b'u',
    Amendments = b'f',
    FeeSettings = b'e',
    Ticket = b'T',
    SignerList = b'S',
    PayChannel = b'x',
    Check = b'C',
    DepositPreauth = b'p',
}

fn indexed(space: Space, body: &[u8]) -> Hash256 {
    let mut buf = Vec::with_capacity(2 + body.len());
    buf.push(0);
    buf.push(space as u8);
    buf.extend_from_slice(body);
    sha512_half(&buf)
}

/// A state-map key. Every ledger entry lives at exactly one keylet.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Keylet(pub Hash256);

impl Keylet {
    pub fn key(&self) -> Hash256 {
        self.0
    }

    /// The account root of `account`.
    pub fn account(account: &AccountId) -> Keylet {
        Keylet(indexed(Space::Account, account.as_bytes()))
    }

    /// The trust line between two accounts in `currency`. Symmetric: the
    /// lower account id always hashes first.
    pub fn line(a: &AccountId, b: &AccountId, currency: &Currency) -> Keylet {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let mut body = Vec::with_capacity(60);
        body.extend_from_slice(low.as_bytes());
        body.extend_from_slice(high.as_bytes());
        body.extend_from_slice(currency.as_bytes());
        Keylet(indexed(Space::TrustLine, &body))
    }

    /// The offer created by `account` with `sequence`.
    pub fn offer(account: &AccountId, sequence: u32) -> Keylet {
        let mut body = Vec::with_capacity(24);
        body.extend_from_slice(account.as_bytes());
        body.extend_from_slice(&sequence.to_be_bytes());
        Keylet(indexed(Space::Offer, &body))
    }

    /// The owner directory root of `account`.
    pub fn owner_dir(account: &AccountId) -> Keylet {
        Keylet(indexed(Space::OwnerDir, account.as_bytes()))
    }

    /// A follow-on page of a directory.
    pub fn dir_page(root: &Hash256, page: u64) -> Keylet {
        if page == 0 {
            return Keylet(*root);
        }
        let mut body = Vec::with_capacity(40);
        body.extend_from_slice(root.as_bytes());
        body.extend_from_slice(&page.to_be_bytes());
        Keylet(indexed(Space::DirNode, &body))
    }

    /// The directory root of an order book. The top 192 bits identify the
    /// book; the low 64 bits hold the (inverted) quality of the best page.
    pub fn book_base(book: &Book) -> Keylet {
        let mut body = Vec::with_capacity(80);
        body.extend_from_slice(book.taker_pays.currency.as_bytes());
        body.extend_from_slice(book.taker_gets.currency.as_bytes());
        body.extend_from_slice(book.taker_pays.issuer.as_bytes());
        body.extend_from_slice(book.taker_gets.issuer.as_bytes());
        let mut key = indexed(Space::BookDir, &body);
        key.0[24..32].copy_from_slice(&[0u8; 8]);
        Keylet(key)
    }

    /// A book directory with an explicit quality in the low 64 bits.
    pub fn book_quality(base: &Keylet, quality: u64) -> Keylet {
        let mut key = base.0;
        key.0[24..32].copy_from_slice(&quality.to_be_bytes());
        Keylet(key)
    }

    /// The ledger-hash skip list.
    pub fn skip_list() -> Keylet {
        Keylet(indexed(Space::SkipList, &[]))
    }

    pub fn escrow(owner: &AccountId, sequence: u32) -> Keylet {
        let mut body = Vec::with_capacity(24);
        body.extend_from_slice(owner.as_bytes());
        body.extend_from_slice(&sequence.to_be_bytes());
        Keylet(indexed(Space::Escrow, &body))
    }

    pub fn paychan(owner: &AccountId, destination: &AccountId, sequence: u32) -> Keylet {
        let mut body = Vec::with_capacity(44);
        body.extend_from_slice(owner.as_bytes());
        body.extend_from_slice(destination.as_bytes());
        body.extend_from_slice(&sequence.to_be_bytes());
        Keylet(indexed(Space::PayChannel, &body))
    }

    pub fn check(owner: &AccountId, sequence: u32) -> Keylet {
        let mut body = Vec::with_capacity(24);
        body.extend_from_slice(owner.as_bytes());
        body.extend_from_slice(&sequence.to_be_bytes());
        Keylet(indexed(Space::Check, &body))
    }

    pub fn ticket(owner: &AccountId, ticket_seq: u32) -> Keylet {
        let mut body = Vec::with_capacity(24);
        body.extend_from_slice(owner.as_bytes());
        body.extend_from_slice(&ticket_seq.to_be_bytes());
        Keylet(indexed(Space::Ticket, &body))
    }

    pub fn signer_list(account: &AccountId) -> Keylet {
        Keylet(indexed(Space::SignerList, account.as_bytes()))
    }

    pub fn deposit_preauth(owner: &AccountId, authorized: &AccountId) -> Keylet {
        let mut body = Vec::with_capacity(40);
        body.extend_from_slice(owner.as_bytes());
        body.extend_from_slice(authorized.as_bytes());
        Keylet(indexed(Space::DepositPreauth, &body))
    }

    /// The singleton amendments table.
    pub fn amendments() -> Keylet {
        Keylet(indexed(Space::Amendments, &[]))
    }

    /// The singleton fee-settings entry.
    pub fn fees() -> Keylet {
        Keylet(indexed(Space::FeeSettings, &[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_is_symmetric() {
        let a = AccountId::from_bytes([1u8; 20]);
        let b = AccountId::from_bytes([2u8; 20]);
        let usd = Currency::from_code("USD").unwrap();
        assert_eq!(Keylet::line(&a, &b, &usd), Keylet::line(&b, &a, &usd));
    }

    #[test]
    fn spaces_do_not_collide() {
        let a = AccountId::from_bytes([1u8; 20]);
        assert_ne!(Keylet::account(&a), Keylet::owner_dir(&a));
        assert_ne!(Keylet::account(&a), Keylet::signer_list(&a));
    }

    #[test]
    fn book_base_masks_quality_bits() {
        use meridian_core::issue::Issue;
        let book = Book::new(
            Issue::NATIVE,
            Issue::new(
                Currency::from_code("USD").unwrap(),
                AccountId::from_bytes([4u8; 20]),
            ),
        );
        let base = Keylet::book_base(&book);
        assert_eq!(&base.0 .0[24..32], &[0u8; 8]);
        let q = Keylet::book_quality(&base, 0xDEAD_BEEF);
        assert_eq!(&q.0 .0[24..32], &0xDEAD_BEEFu64.to_be_bytes());
        assert_eq!(&q.0 .0[..24], &base.0 .0[..24]);
    }

    #[test]
    fn dir_page_zero_is_root() {
        let a = AccountId::from_bytes([9u8; 20]);
        let root = Keylet::owner_dir(&a);
        assert_eq!(Keylet::dir_page(&root.0, 0), root);
        assert_ne!(Keylet::dir_page(&root.0, 1), root);
    }
}

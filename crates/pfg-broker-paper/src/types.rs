use pfg_schemas::AccountId;

/// An order accepted but not filled (only with fill-on-submit off).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkingOrder {
    pub order_id: String,
    pub symbol: String,
    pub qty_signed: i64,
}

/// Call log entry; lets tests assert what the guardian asked for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaperCall {
    Submit {
        account_id: AccountId,
        symbol: String,
        qty_signed: i64,
    },
    CancelAll {
        account_id: AccountId,
    },
    Flatten {
        account_id: AccountId,
        legs: usize,
    },
}

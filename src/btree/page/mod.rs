pub mod body;
pub mod node;
pub mod page_ref;

pub use body::{
    AddrCookie, ColumnFixedLeaf, ColumnVariableLeaf, InternalIndex, PageBody, PageType, RleEntry,
    RowLeaf, RowSlot, RowSlotTag,
};
pub use node::{Modify, PageNode};
pub use page_ref::{Ref, RefState};

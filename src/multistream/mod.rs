//! The multistream-select line protocol: wire codec, negotiator, and
//! protocol switch.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

pub mod codec;
pub mod negotiate;
pub mod switch;

pub use negotiate::{listener_negotiate, select_one_of};
pub use switch::{Handler, Switch};

// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub mod catalog;
pub mod index;
pub mod query;
pub mod ranges;

pub use catalog::{catalog_add_command, catalog_edit_command, catalog_list_command};
pub use index::{index_command, index_with_tool};
pub use query::{
    FactorChoice, hash_command, info_command, radiometric_command, search_command, text_command,
};
pub use ranges::{ranges_command, ranges_with_tool};

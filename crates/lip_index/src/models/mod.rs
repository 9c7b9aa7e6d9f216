// SPDX-License-Identifier: Apache-2.0

pub(crate) mod index;
pub(crate) mod manifest;

// SPDX-License-Identifier: Apache-2.0

mod registry;

pub use registry::RegistryArgs;

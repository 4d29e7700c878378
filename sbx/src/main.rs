/*
 * sbx
 *
 * Copyright (C) 2023-2024 Xavier R.M. <sapphirus@azorium.net>
 * SPDX-License-Identifier: GPL-3.0-only
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, version 3.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use sbx_core::utils::arguments::{Arguments, Operand as Op};

mod doctor;
mod info;
mod run;
mod store;

fn main() {
    let arguments = &mut Arguments::new().populate();
    let result = match arguments.next().unwrap_or_default() {
        Op::Value("run") | Op::Value("shell") => run::run(arguments),
        Op::Value("info") => info::info(arguments),
        Op::Value("doctor") => doctor::doctor(arguments),
        _ => arguments.invalid_operand(),
    };

    if let Err(error) = result {
        error.error();
    }
}

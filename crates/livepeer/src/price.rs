//! Token prices derived from a Uniswap v3 style `sqrtPriceX96`.

use bondgraph_core::{Address, U256};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::Zero;
use tracing::info;

use crate::{
    decimal::{self, Decimal},
    reader::ContractReader,
};

const TOKEN_DECIMALS: u32 = 18;

fn q192() -> BigInt {
    BigInt::from(1u8) << 192
}

/// Returns `(price0, price1)` where `price1` is the amount of token1 per
/// token0, adjusted for the token decimals. A zero price yields a zero
/// inverse.
pub fn sqrt_price_x96_to_prices(
    sqrt_price: &U256,
    decimals0: u32,
    decimals1: u32,
) -> (Decimal, Decimal) {
    let sqrt_price = decimal::to_bigint(sqrt_price);

    let numer = &sqrt_price * &sqrt_price * BigInt::from(10u8).pow(decimals0);
    let denom = q192() * BigInt::from(10u8).pow(decimals1);

    let price1 = BigRational::new(numer, denom);

    let price0 = match price1.is_zero() {
        true => Decimal::zero(),
        false => {
            let inverse = price1.recip();
            Decimal::from_ratio(inverse.numer(), inverse.denom()).unwrap_or_default()
        }
    };

    let price1 = Decimal::from_ratio(price1.numer(), price1.denom()).unwrap_or_default();

    (price0, price1)
}

/// Reads the current price of a configured pool; unconfigured pools and
/// reverted reads price at zero.
pub fn price_for_pair<R: ContractReader>(reader: &mut R, pool: Option<&Address>) -> Decimal {
    let Some(pool) = pool else {
        return Decimal::zero();
    };

    match reader.slot0(pool) {
        Ok(sqrt_price) => sqrt_price_x96_to_prices(&sqrt_price, TOKEN_DECIMALS, TOKEN_DECIMALS).1,
        Err(err) => {
            info!(%pool, %err, "slot0 unavailable, pricing at zero");
            Decimal::zero()
        }
    }
}

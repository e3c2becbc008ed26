use crate::prelude::*;
use crate::samil::finder::InverterFinder;

/// Pairs with `count` inverters and returns them wrapped in keep-alive
/// sessions.
///
/// The finder is opened with bind retries (a previous process may still hold
/// the port) and is closed again before returning, whether pairing succeeded
/// or not. If any inverter fails to pair, the ones already paired are
/// disconnected and the error is returned.
pub async fn connect_inverters(
    finder_config: &config::Finder,
    inverter_config: &config::Inverter,
    count: usize,
) -> Result<Vec<KeepAliveInverter>> {
    let mut finder = InverterFinder::new(finder_config.clone());
    finder
        .open_with_retries(finder_config.bind_retries(), finder_config.bind_retry_delay())
        .await?;

    let result = pair(&mut finder, inverter_config, count).await;
    finder.close();
    result
}

async fn pair(
    finder: &mut InverterFinder,
    inverter_config: &config::Inverter,
    count: usize,
) -> Result<Vec<KeepAliveInverter>> {
    let mut inverters: Vec<KeepAliveInverter> = Vec::with_capacity(count);

    while inverters.len() < count {
        match finder.find_inverter().await {
            Ok((stream, addr)) => {
                let inverter = Inverter::new(stream, addr, inverter_config);
                inverters.push(KeepAliveInverter::from_config(inverter, inverter_config));
                info!("paired {}/{} inverters", inverters.len(), count);
            }
            Err(e) => {
                for inverter in inverters.iter_mut() {
                    if let Err(e) = inverter.disconnect().await {
                        warn!("inverter {}: disconnect failed: {}", inverter.addr(), e);
                    }
                }
                return Err(e);
            }
        }
    }

    Ok(inverters)
}

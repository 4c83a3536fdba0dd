use std::net::Ipv4Addr;

use fipqos_common::Direction;

use crate::{
    command::{CommandSpec, Executor, Runner},
    parse::{self, FilterEntry},
    request, Error, FilterId, IpRateLimiter, QdiscId, Result,
};

/// Manages floating IP rate limit filters on one device in one namespace.
#[derive(Debug, Clone)]
pub struct FloatingIpTcCommand<E = Runner> {
    device: String,
    namespace: Option<String>,
    executor: E,
}

impl FloatingIpTcCommand<Runner> {
    pub fn new(device: impl Into<String>, namespace: Option<String>) -> Self {
        Self::with_executor(device, namespace, Runner::default())
    }
}

impl<E: Executor> FloatingIpTcCommand<E> {
    pub fn with_executor(
        device: impl Into<String>,
        namespace: Option<String>,
        executor: E,
    ) -> Self {
        Self { device: device.into(), namespace, executor }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn execute(&self, cmd: CommandSpec) -> Result<String> {
        let cmd = cmd.in_namespace(self.namespace.as_deref());
        Ok(self.executor.execute(&cmd)?)
    }

    /// Raw `tc qdisc show` listing of the device.
    pub fn get_qdiscs(&self) -> Result<String> {
        self.execute(request::qdisc_show(&self.device))
    }

    /// The handle of the qdisc that filters for `direction` attach to, if it exists.
    pub fn get_qdisc_id_for_filter(&self, direction: Direction) -> Result<Option<QdiscId>> {
        let qdiscs = self.get_qdiscs()?;
        Ok(parse::parse_qdiscs(&qdiscs)
            .into_iter()
            .find(|qdisc| qdisc.serves(direction))
            .map(|qdisc| qdisc.handle))
    }

    pub fn add_qdisc(&self, direction: Direction) -> Result<()> {
        self.execute(request::qdisc_add(&self.device, direction))?;
        Ok(())
    }

    /// Returns the qdisc for `direction`, creating it first if the device has none.
    pub fn get_or_create_qdisc(&self, direction: Direction) -> Result<QdiscId> {
        if let Some(qdisc_id) = self.get_qdisc_id_for_filter(direction)? {
            return Ok(qdisc_id);
        }

        tracing::debug!(
            device = %self.device,
            namespace = ?self.namespace,
            %direction,
            "adding qdisc"
        );
        self.add_qdisc(direction)?;

        self.get_qdisc_id_for_filter(direction)?.ok_or_else(|| Error::FailedToAddQdiscToDevice {
            direction,
            device: self.device.clone(),
            namespace: self.namespace.clone(),
        })
    }

    /// Raw filter listing of priority band 1 under `qdisc_id`.
    pub fn get_filters(&self, qdisc_id: &str) -> Result<String> {
        self.execute(request::filter_show(&self.device, qdisc_id))
    }

    /// Parsed filters under `qdisc_id`.
    pub fn get_filter_entries(&self, qdisc_id: &str) -> Result<Vec<FilterEntry>> {
        Ok(parse::parse_filters(&self.get_filters(qdisc_id)?))
    }

    /// The handle of the single filter under `qdisc_id` matching `ip`.
    ///
    /// Fails with [`Error::FilterIdForIpNotFound`] if no filter matches, and with
    /// [`Error::MultipleFilterIdForIpFound`] if more than one does.
    pub fn get_filterid_for_ip(&self, qdisc_id: &str, ip: Ipv4Addr) -> Result<FilterId> {
        let mut matching =
            self.get_filter_entries(qdisc_id)?.into_iter().filter(|entry| entry.target == Some(ip));

        match (matching.next(), matching.next()) {
            (Some(entry), None) => Ok(entry.handle),
            (None, _) => Err(Error::FilterIdForIpNotFound { ip }),
            (Some(_), Some(_)) => Err(Error::MultipleFilterIdForIpFound { ip }),
        }
    }

    /// Handles of every filter under `qdisc_id`, in listing order.
    pub fn get_qdisc_filters(&self, qdisc_id: &str) -> Result<Vec<FilterId>> {
        Ok(self.get_filter_entries(qdisc_id)?.into_iter().map(|entry| entry.handle).collect())
    }

    pub fn add_filter(
        &self,
        qdisc_id: &str,
        direction: Direction,
        ip: Ipv4Addr,
        max_kbps: u32,
        max_burst_kbps: u32,
    ) -> Result<()> {
        let cmd =
            request::filter_add(&self.device, qdisc_id, direction, ip, max_kbps, max_burst_kbps);
        self.execute(cmd)?;
        Ok(())
    }

    pub fn del_filter_by_id(&self, qdisc_id: &str, filter_id: &str) -> Result<()> {
        self.execute(request::filter_del(&self.device, qdisc_id, filter_id))?;
        Ok(())
    }

    /// The filter for `ip` under `qdisc_id`, treating absence as `None`.
    fn existing_filter_id(&self, qdisc_id: &str, ip: Ipv4Addr) -> Result<Option<FilterId>> {
        match self.get_filterid_for_ip(qdisc_id, ip) {
            Ok(filter_id) => Ok(Some(filter_id)),
            Err(Error::FilterIdForIpNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<E: Executor> IpRateLimiter for FloatingIpTcCommand<E> {
    fn set_ip_rate_limit(
        &self,
        direction: Direction,
        ip: Ipv4Addr,
        max_kbps: u32,
        max_burst_kbps: u32,
    ) -> Result<()> {
        let qdisc_id = self.get_or_create_qdisc(direction)?;

        if let Some(filter_id) = self.existing_filter_id(&qdisc_id, ip)? {
            tracing::debug!(%ip, %direction, %filter_id, "replacing existing filter");
            self.del_filter_by_id(&qdisc_id, &filter_id)?;
        }

        self.add_filter(&qdisc_id, direction, ip, max_kbps, max_burst_kbps)
    }

    fn clear_ip_rate_limit(&self, direction: Direction, ip: Ipv4Addr) -> Result<()> {
        let Some(qdisc_id) = self.get_qdisc_id_for_filter(direction)? else {
            return Ok(());
        };

        match self.existing_filter_id(&qdisc_id, ip)? {
            Some(filter_id) => self.del_filter_by_id(&qdisc_id, &filter_id),
            None => Ok(()),
        }
    }

    fn clear_all_filters(&self, direction: Direction) -> Result<()> {
        let Some(qdisc_id) = self.get_qdisc_id_for_filter(direction)? else {
            return Ok(());
        };

        for filter_id in self.get_qdisc_filters(&qdisc_id)? {
            self.del_filter_by_id(&qdisc_id, &filter_id)?;
        }

        Ok(())
    }

    fn get_filter_id_for_ip(&self, direction: Direction, ip: Ipv4Addr) -> Result<Option<FilterId>> {
        match self.get_qdisc_id_for_filter(direction)? {
            Some(qdisc_id) => self.existing_filter_id(&qdisc_id, ip),
            None => Ok(None),
        }
    }

    fn get_existing_filter_ids(&self, direction: Direction) -> Result<Vec<FilterId>> {
        match self.get_qdisc_id_for_filter(direction)? {
            Some(qdisc_id) => self.get_qdisc_filters(&qdisc_id),
            None => Ok(Vec::new()),
        }
    }

    fn delete_filter_ids(&self, direction: Direction, filter_ids: &[FilterId]) -> Result<()> {
        let Some(qdisc_id) = self.get_qdisc_id_for_filter(direction)? else {
            return Ok(());
        };

        for filter_id in filter_ids {
            self.del_filter_by_id(&qdisc_id, filter_id)?;
        }

        Ok(())
    }
}

//! The native job descriptor record.
//!
//! [`JobDescriptor`] mirrors the host scheduler's job description: nullable
//! strings, fixed-width integers whose reserved sentinel means "unset",
//! sentinel-encoded booleans, timestamps and ordered string arrays. It holds
//! the union of the fields of every supported host release; which of them a
//! policy script sees is decided by the field table in [`crate::codec`].

use serde::{Deserialize, Serialize};

use crate::array::StringArray;

/// Unset marker for 8-bit fields.
pub const NO_VAL8: u8 = 0xfe;
/// Unset marker for 16-bit fields.
pub const NO_VAL16: u16 = 0xfffe;
/// Unset marker for 32-bit fields.
pub const NO_VAL32: u32 = 0xffff_fffe;
/// Unset marker for 64-bit fields.
pub const NO_VAL64: u64 = 0xffff_ffff_ffff_fffe;

/// A job submission request as handed over by the host scheduler.
///
/// The default value is the host's freshly initialised description: every
/// integer at its unset marker, every string absent, every array empty and
/// every timestamp zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDescriptor {
    /// Charge account.
    pub account: Option<String>,
    /// Accounting sampling intervals.
    pub acctg_freq: Option<String>,
    /// Administrator's arbitrary comment.
    pub admin_comment: Option<String>,
    /// Node making the resource allocation.
    pub alloc_node: Option<String>,
    /// Port for allocation responses.
    pub alloc_resp_port: u16,
    /// Session id of the allocating process.
    pub alloc_sid: u32,
    /// Arguments of the batch script.
    pub argv: StringArray,
    /// Job array index expression.
    pub array_inx: Option<String>,
    /// Earliest start time.
    pub begin_time: i64,
    /// Job flag bits.
    pub bitflags: u32,
    /// Burst buffer specification.
    pub burst_buffer: Option<String>,
    /// Clusters the job may run on.
    pub clusters: Option<String>,
    /// User's arbitrary comment.
    pub comment: Option<String>,
    /// Whether allocated nodes must be contiguous.
    pub contiguous: u16,
    /// Specialized core or thread count.
    pub core_spec: u16,
    /// CPU binding map or mask.
    pub cpu_bind: Option<String>,
    /// CPU binding type flags.
    pub cpu_bind_type: u16,
    /// Minimum CPU frequency.
    pub cpu_freq_min: u32,
    /// Maximum CPU frequency.
    pub cpu_freq_max: u32,
    /// CPU frequency governor.
    pub cpu_freq_gov: u32,
    /// Time by which the job must finish.
    pub deadline: i64,
    /// Seconds to wait before rebooting nodes.
    pub delay_boot: u32,
    /// Job dependency expression.
    pub dependency: Option<String>,
    /// Requested end time.
    pub end_time: i64,
    /// Environment of the batch script, as `key=value` entries.
    pub environment: StringArray,
    /// Nodes excluded from the allocation.
    pub exc_nodes: Option<String>,
    /// Required node features.
    pub features: Option<String>,
    /// Group id the job runs as.
    pub group_id: u32,
    /// Fail unless resources are available immediately.
    pub immediate: u16,
    /// Requested job id.
    pub job_id: u32,
    /// Requested job id as text.
    pub job_id_str: Option<String>,
    /// Kill the job when an allocated node fails.
    pub kill_on_node_fail: u16,
    /// Licenses required by the job.
    pub licenses: Option<String>,
    /// Events that trigger mail.
    pub mail_type: u16,
    /// Mail recipient.
    pub mail_user: Option<String>,
    /// Multi-category security label.
    pub mcs_label: Option<String>,
    /// Memory binding map or mask.
    pub mem_bind: Option<String>,
    /// Memory binding type flags.
    pub mem_bind_type: u16,
    /// Job name.
    pub name: Option<String>,
    /// Network use specification.
    pub network: Option<String>,
    /// Scheduling priority adjustment.
    pub nice: u32,
    /// Number of tasks.
    pub num_tasks: u32,
    /// Output file open mode.
    pub open_mode: u8,
    /// Port for client communications.
    pub other_port: u16,
    /// Allow more than one task per CPU.
    pub overcommit: u8,
    /// Requested partition.
    pub partition: Option<String>,
    /// Plane distribution size.
    pub plane_size: u16,
    /// Power management flags.
    pub power_flags: u8,
    /// Requested priority.
    pub priority: u32,
    /// Profiling flags.
    pub profile: u32,
    /// Quality of service.
    pub qos: Option<String>,
    /// Reboot nodes before starting the job.
    pub reboot: u16,
    /// Host to send responses to.
    pub resp_host: Option<String>,
    /// Number of restarts.
    pub restart_cnt: u16,
    /// Nodes the job requires.
    pub req_nodes: Option<String>,
    /// Whether the job may be requeued.
    pub requeue: u16,
    /// Reservation name.
    pub reservation: Option<String>,
    /// Batch script text.
    pub script: Option<String>,
    /// Node sharing mode.
    pub shared: u16,
    /// Environment set by plugin stack extensions.
    pub spank_job_env: StringArray,
    /// Task distribution.
    pub task_dist: u32,
    /// Time limit in minutes.
    pub time_limit: u32,
    /// Minimum acceptable time limit in minutes.
    pub time_min: u32,
    /// User id the job runs as.
    pub user_id: u32,
    /// Wait for all nodes to boot before starting.
    pub wait_all_nodes: u16,
    /// Flags for the pre-termination signal.
    pub warn_flags: u16,
    /// Signal sent before the time limit.
    pub warn_signal: u16,
    /// Seconds before the time limit to send the signal.
    pub warn_time: u16,
    /// Working directory.
    pub work_dir: Option<String>,
    /// CPUs per task.
    pub cpus_per_task: u16,
    /// Minimum CPU count.
    pub min_cpus: u32,
    /// Maximum CPU count.
    pub max_cpus: u32,
    /// Minimum node count.
    pub min_nodes: u32,
    /// Maximum node count.
    pub max_nodes: u32,
    /// Boards per node.
    pub boards_per_node: u16,
    /// Sockets per board.
    pub sockets_per_board: u16,
    /// Sockets per node.
    pub sockets_per_node: u16,
    /// Cores per socket.
    pub cores_per_socket: u16,
    /// Threads per core.
    pub threads_per_core: u16,
    /// Tasks per node.
    pub ntasks_per_node: u16,
    /// Tasks per socket.
    pub ntasks_per_socket: u16,
    /// Tasks per core.
    pub ntasks_per_core: u16,
    /// Tasks per board.
    pub ntasks_per_board: u16,
    /// Minimum CPUs per node.
    pub pn_min_cpus: u16,
    /// Minimum memory per node or per CPU, in megabytes.
    pub pn_min_memory: u64,
    /// Minimum temporary disk per node, in megabytes.
    pub pn_min_tmp_disk: u32,
    /// Requested switch count.
    pub req_switch: u32,
    /// Standard error path.
    pub std_err: Option<String>,
    /// Standard input path.
    pub std_in: Option<String>,
    /// Standard output path.
    pub std_out: Option<String>,
    /// Maximum seconds to wait for the switch count.
    pub wait4switch: u32,
    /// Workload characterization key.
    pub wckey: Option<String>,
    /// Federation siblings bitmap.
    pub fed_siblings: u64,
    /// Heterogeneous group number.
    pub group_number: u32,
    /// Number of pack components.
    pub numpack: u32,
    /// Pack leader job id.
    pub pack_leader: u32,
    /// Prolog and epilog environment, as `key=value` entries.
    pub pelog_env: StringArray,
    /// Reserved port count.
    pub resv_port: u8,
    /// Required cluster features.
    pub cluster_features: Option<String>,
    /// Arbitrary extra text.
    pub extra: Option<String>,
    /// Active federation siblings bitmap.
    pub fed_siblings_active: u64,
    /// Viable federation siblings bitmap.
    pub fed_siblings_viable: u64,
    /// Cluster the job originated from.
    pub origin_cluster: Option<String>,
    /// X11 forwarding flags.
    pub x11: u16,
    /// X11 authentication cookie.
    pub x11_magic_cookie: Option<String>,
    /// X11 target port.
    pub x11_target_port: u16,
    /// Generic resources.
    pub gres: Option<String>,
    /// Features required for the batch host.
    pub batch_features: Option<String>,
    /// CPUs per trackable resource.
    pub cpus_per_tres: Option<String>,
    /// Memory per trackable resource.
    pub mem_per_tres: Option<String>,
    /// Task to trackable resource binding.
    pub tres_bind: Option<String>,
    /// Trackable resource frequencies.
    pub tres_freq: Option<String>,
    /// Trackable resources per job.
    pub tres_per_job: Option<String>,
    /// Trackable resources per node.
    pub tres_per_node: Option<String>,
    /// Trackable resources per socket.
    pub tres_per_socket: Option<String>,
    /// Trackable resources per task.
    pub tres_per_task: Option<String>,
    /// Site priority factor.
    pub site_factor: u32,
    /// X11 target host.
    pub x11_target: Option<String>,
    /// Command line used to submit the job.
    pub submit_line: Option<String>,
}

impl Default for JobDescriptor {
    fn default() -> Self {
        Self {
            account: None,
            acctg_freq: None,
            admin_comment: None,
            alloc_node: None,
            alloc_resp_port: NO_VAL16,
            alloc_sid: NO_VAL32,
            argv: StringArray::new(),
            array_inx: None,
            begin_time: 0,
            bitflags: NO_VAL32,
            burst_buffer: None,
            clusters: None,
            comment: None,
            contiguous: NO_VAL16,
            core_spec: NO_VAL16,
            cpu_bind: None,
            cpu_bind_type: NO_VAL16,
            cpu_freq_min: NO_VAL32,
            cpu_freq_max: NO_VAL32,
            cpu_freq_gov: NO_VAL32,
            deadline: 0,
            delay_boot: NO_VAL32,
            dependency: None,
            end_time: 0,
            environment: StringArray::new(),
            exc_nodes: None,
            features: None,
            group_id: NO_VAL32,
            immediate: NO_VAL16,
            job_id: NO_VAL32,
            job_id_str: None,
            kill_on_node_fail: NO_VAL16,
            licenses: None,
            mail_type: NO_VAL16,
            mail_user: None,
            mcs_label: None,
            mem_bind: None,
            mem_bind_type: NO_VAL16,
            name: None,
            network: None,
            nice: NO_VAL32,
            num_tasks: NO_VAL32,
            open_mode: NO_VAL8,
            other_port: NO_VAL16,
            overcommit: NO_VAL8,
            partition: None,
            plane_size: NO_VAL16,
            power_flags: NO_VAL8,
            priority: NO_VAL32,
            profile: NO_VAL32,
            qos: None,
            reboot: NO_VAL16,
            resp_host: None,
            restart_cnt: NO_VAL16,
            req_nodes: None,
            requeue: NO_VAL16,
            reservation: None,
            script: None,
            shared: NO_VAL16,
            spank_job_env: StringArray::new(),
            task_dist: NO_VAL32,
            time_limit: NO_VAL32,
            time_min: NO_VAL32,
            user_id: NO_VAL32,
            wait_all_nodes: NO_VAL16,
            warn_flags: NO_VAL16,
            warn_signal: NO_VAL16,
            warn_time: NO_VAL16,
            work_dir: None,
            cpus_per_task: NO_VAL16,
            min_cpus: NO_VAL32,
            max_cpus: NO_VAL32,
            min_nodes: NO_VAL32,
            max_nodes: NO_VAL32,
            boards_per_node: NO_VAL16,
            sockets_per_board: NO_VAL16,
            sockets_per_node: NO_VAL16,
            cores_per_socket: NO_VAL16,
            threads_per_core: NO_VAL16,
            ntasks_per_node: NO_VAL16,
            ntasks_per_socket: NO_VAL16,
            ntasks_per_core: NO_VAL16,
            ntasks_per_board: NO_VAL16,
            pn_min_cpus: NO_VAL16,
            pn_min_memory: NO_VAL64,
            pn_min_tmp_disk: NO_VAL32,
            req_switch: NO_VAL32,
            std_err: None,
            std_in: None,
            std_out: None,
            wait4switch: NO_VAL32,
            wckey: None,
            fed_siblings: NO_VAL64,
            group_number: NO_VAL32,
            numpack: NO_VAL32,
            pack_leader: NO_VAL32,
            pelog_env: StringArray::new(),
            resv_port: NO_VAL8,
            cluster_features: None,
            extra: None,
            fed_siblings_active: NO_VAL64,
            fed_siblings_viable: NO_VAL64,
            origin_cluster: None,
            x11: NO_VAL16,
            x11_magic_cookie: None,
            x11_target_port: NO_VAL16,
            gres: None,
            batch_features: None,
            cpus_per_tres: None,
            mem_per_tres: None,
            tres_bind: None,
            tres_freq: None,
            tres_per_job: None,
            tres_per_node: None,
            tres_per_socket: None,
            tres_per_task: None,
            site_factor: NO_VAL32,
            x11_target: None,
            submit_line: None,
        }
    }
}

impl JobDescriptor {
    /// Create a descriptor with every field unset.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_unset_markers() {
        let desc = JobDescriptor::default();

        assert_eq!(desc.open_mode, NO_VAL8);
        assert_eq!(desc.overcommit, NO_VAL8);
        assert_eq!(desc.contiguous, NO_VAL16);
        assert_eq!(desc.time_limit, NO_VAL32);
        assert_eq!(desc.pn_min_memory, NO_VAL64);
        assert_eq!(desc.begin_time, 0);
        assert!(desc.name.is_none());
        assert!(desc.argv.is_empty());
        assert!(desc.environment.is_empty());
    }

    #[test]
    fn test_sentinels_sit_below_type_maximum() {
        assert_eq!(NO_VAL8, u8::MAX - 1);
        assert_eq!(NO_VAL16, u16::MAX - 1);
        assert_eq!(NO_VAL32, u32::MAX - 1);
        assert_eq!(NO_VAL64, u64::MAX - 1);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let desc: JobDescriptor = serde_json::from_str(
            r#"{"name": "job1", "time_limit": 60, "environment": ["PATH=/bin"]}"#,
        )
        .unwrap();

        assert_eq!(desc.name.as_deref(), Some("job1"));
        assert_eq!(desc.time_limit, 60);
        assert_eq!(desc.environment.len(), 1);
        // Everything not mentioned keeps its unset marker.
        assert_eq!(desc.min_nodes, NO_VAL32);
        assert_eq!(desc.requeue, NO_VAL16);
    }

    #[test]
    fn test_json_roundtrip_preserves_descriptor() {
        let mut desc = JobDescriptor::new();
        desc.partition = Some("batch".to_string());
        desc.argv = StringArray::from(vec!["a".to_string(), "b".to_string()]);
        desc.deadline = 1_700_000_000;

        let json = serde_json::to_string(&desc).unwrap();
        let back: JobDescriptor = serde_json::from_str(&json).unwrap();

        assert_eq!(back, desc);
    }
}
